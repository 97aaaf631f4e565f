// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use billing_core::{Error, ErrorCode};

/// JSON-RPC error codes specific to the billing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonRpcErrorCode {
    /// -32010 -- The billing backend could not be connected.
    Unavailable = -32010,
    /// -32011 -- The billing operation failed or was abandoned.
    Billing = -32011,
    /// -32602 -- Invalid method parameters.
    InvalidParams = -32602,
}

impl From<&Error> for JsonRpcErrorCode {
    fn from(err: &Error) -> Self {
        match (err, err.code()) {
            (Error::InvalidArguments { .. }, _) => JsonRpcErrorCode::InvalidParams,
            (_, ErrorCode::Unavailable) => JsonRpcErrorCode::Unavailable,
            (_, ErrorCode::Error) => JsonRpcErrorCode::Billing,
        }
    }
}
