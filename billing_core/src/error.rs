// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced to callers of the billing session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::{backend::ProductType, ResponseCode};

/// Coarse error code carried on every error response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum ErrorCode {
    /// The connection to the billing backend could not be established.
    #[strum(serialize = "UNAVAILABLE")]
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    /// The backend answered with a non-success status, or the request
    /// could not be completed.
    #[strum(serialize = "ERROR")]
    #[serde(rename = "ERROR")]
    Error,
}

/// Verb used in the "failed to launch billing flow" message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FlowAction {
    Purchase,
    Subscribe,
}

impl From<ProductType> for FlowAction {
    fn from(product_type: ProductType) -> Self {
        match product_type {
            ProductType::InApp => FlowAction::Purchase,
            ProductType::Subs => FlowAction::Subscribe,
        }
    }
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Billing service is unavailable!")]
    ServiceUnavailable,
    #[error("Failed to fetch products with error {code}")]
    FetchProducts { code: ResponseCode },
    #[error("Failed to query purchases with error {code}")]
    QueryPurchases { code: ResponseCode },
    #[error("Failed to launch billing flow to {action} an item with error {code}")]
    LaunchFlow {
        action: FlowAction,
        code: ResponseCode,
    },
    #[error("Failed to purchase an item with error {code}")]
    PurchaseFailed { code: ResponseCode },
    #[error("Request for {identifier} was replaced by a newer request for the same item")]
    Superseded { identifier: String },
    #[error("No purchase update for {identifier} arrived within {timeout:?}")]
    PendingTimeout {
        identifier: String,
        timeout: Duration,
    },
    #[error("Invalid arguments for {method}: {reason}")]
    InvalidArguments { method: String, reason: String },
    #[error("Failed to encode response: {source_error_message}")]
    Encoding { source_error_message: String },
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ServiceUnavailable => ErrorCode::Unavailable,
            _ => ErrorCode::Error,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
