// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Product details as reported by the backend, and their wire form.

use serde::{Deserialize, Serialize};

/// Backend micro-units per wire `amount` unit.
pub const MICROS_PER_AMOUNT_UNIT: i64 = 10_000;

/// Product details exactly as the billing backend reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub sku: String,
    /// Localized, formatted display price.
    pub price: String,
    pub introductory_price: Option<String>,
    pub title: String,
    pub description: String,
    pub price_currency_code: String,
    pub price_amount_micros: i64,
}

/// Product as returned to callers of `fetchProducts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub identifier: String,
    pub price: String,
    pub introductory_price: Option<String>,
    pub title: String,
    pub description: String,
    pub currency: String,
    /// Price in hundredths of the currency unit, truncated.
    pub amount: i64,
}

impl From<&ProductDetails> for Product {
    fn from(details: &ProductDetails) -> Self {
        Product {
            identifier: details.sku.clone(),
            price: details.price.clone(),
            introductory_price: details.introductory_price.clone(),
            title: details.title.clone(),
            description: details.description.clone(),
            currency: details.price_currency_code.clone(),
            amount: details.price_amount_micros / MICROS_PER_AMOUNT_UNIT,
        }
    }
}

pub fn products_from_details(details: &[ProductDetails]) -> Vec<Product> {
    details.iter().map(Product::from).collect()
}
