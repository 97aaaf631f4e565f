// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Purchase records as reported by the backend, and their wire form.

use serde::{Deserialize, Serialize};

/// A purchase exactly as the billing backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub order_id: String,
    pub package_name: String,
    pub sku: String,
    pub purchase_token: String,
    /// Milliseconds since the epoch.
    pub purchase_time: i64,
    pub auto_renewing: bool,
}

/// Purchase as returned to callers.
///
/// `autorenewal` is the string `"true"` or `"false"`, not a boolean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub order_id: String,
    pub package_name: String,
    pub identifier: String,
    pub purchase_token: String,
    pub purchase_time: i64,
    pub autorenewal: String,
}

impl From<&PurchaseRecord> for Purchase {
    fn from(record: &PurchaseRecord) -> Self {
        Purchase {
            order_id: record.order_id.clone(),
            package_name: record.package_name.clone(),
            identifier: record.sku.clone(),
            purchase_token: record.purchase_token.clone(),
            purchase_time: record.purchase_time,
            autorenewal: if record.auto_renewing { "true" } else { "false" }.to_string(),
        }
    }
}

pub fn purchases_from_records(records: &[PurchaseRecord]) -> Vec<Purchase> {
    records.iter().map(Purchase::from).collect()
}
