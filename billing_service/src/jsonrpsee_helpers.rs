// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use billing_core::{Error, ErrorCode};
use serde::{Deserialize, Serialize};

use crate::error_codes::JsonRpcErrorCode;

/// `data` member of every billing error response.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct JsonRpcErrorData {
    pub code: ErrorCode,
}

pub type JsonRpcError = jsonrpsee::types::ErrorObjectOwned;
pub type JsonRpcResult<T> = Result<T, JsonRpcError>;

/// Converts a billing error into its JSON-RPC error object, keeping the
/// original message and carrying the coarse code in `data`.
pub fn billing_error(err: &Error) -> JsonRpcError {
    jsonrpsee::types::ErrorObject::owned(
        JsonRpcErrorCode::from(err) as i32,
        err.to_string(),
        Some(JsonRpcErrorData { code: err.code() }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_object_carries_coarse_code() {
        let object = billing_error(&Error::ServiceUnavailable);

        assert_eq!(object.code(), -32010);
        assert_eq!(object.message(), "Billing service is unavailable!");
        let data: JsonRpcErrorData =
            serde_json::from_str(object.data().unwrap().get()).unwrap();
        assert_eq!(data.code, ErrorCode::Unavailable);
    }
}
