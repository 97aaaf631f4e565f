// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer status reported by the billing backend for every operation and
/// purchase-update notification.
///
/// Only [`ResponseCode::OK`] means success. Unknown values are carried as-is,
/// so a backend that grows new codes never fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseCode(pub i32);

impl ResponseCode {
    pub const FEATURE_NOT_SUPPORTED: ResponseCode = ResponseCode(-2);
    pub const SERVICE_DISCONNECTED: ResponseCode = ResponseCode(-1);
    pub const OK: ResponseCode = ResponseCode(0);
    pub const USER_CANCELED: ResponseCode = ResponseCode(1);
    pub const SERVICE_UNAVAILABLE: ResponseCode = ResponseCode(2);
    pub const BILLING_UNAVAILABLE: ResponseCode = ResponseCode(3);
    pub const ITEM_UNAVAILABLE: ResponseCode = ResponseCode(4);
    pub const DEVELOPER_ERROR: ResponseCode = ResponseCode(5);
    pub const ERROR: ResponseCode = ResponseCode(6);
    pub const ITEM_ALREADY_OWNED: ResponseCode = ResponseCode(7);
    pub const ITEM_NOT_OWNED: ResponseCode = ResponseCode(8);

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    /// Symbolic name of a well-known code, `None` for anything else.
    pub fn name(&self) -> Option<&'static str> {
        let name = match self.0 {
            -2 => "FEATURE_NOT_SUPPORTED",
            -1 => "SERVICE_DISCONNECTED",
            0 => "OK",
            1 => "USER_CANCELED",
            2 => "SERVICE_UNAVAILABLE",
            3 => "BILLING_UNAVAILABLE",
            4 => "ITEM_UNAVAILABLE",
            5 => "DEVELOPER_ERROR",
            6 => "ERROR",
            7 => "ITEM_ALREADY_OWNED",
            8 => "ITEM_NOT_OWNED",
            _ => return None,
        };
        Some(name)
    }
}

// Messages embed the raw number, callers match on it.
impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ResponseCode {
    fn from(code: i32) -> Self {
        ResponseCode(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_numeric() {
        assert_eq!(ResponseCode::USER_CANCELED.to_string(), "1");
        assert_eq!(ResponseCode(-1).to_string(), "-1");
    }

    #[test]
    fn unknown_codes_have_no_name() {
        assert_eq!(ResponseCode(42).name(), None);
        assert_eq!(ResponseCode::ITEM_ALREADY_OWNED.name(), Some("ITEM_ALREADY_OWNED"));
        assert!(!ResponseCode(42).is_ok());
    }
}
