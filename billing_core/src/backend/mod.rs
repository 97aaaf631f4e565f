// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Adapter for the billing backend.
//!
//! The backend itself is defined by the user of the library, typically as a
//! thin binding over a platform billing SDK. It must be connected before any
//! operation, and it reports purchase results out of band, as
//! [`BillingEvent`]s pushed into the channel the session drains.

#[cfg(feature = "in_memory")]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{product::ProductDetails, purchase::PurchaseRecord, ResponseCode};

/// Kind of product a query or purchase flow refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum ProductType {
    /// One-time product, optionally consumable.
    #[serde(rename = "inapp", alias = "one-time")]
    #[strum(serialize = "inapp")]
    InApp,
    #[serde(rename = "subs", alias = "subscription")]
    #[strum(serialize = "subs")]
    Subs,
}

/// Unsolicited notification delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// The current batch of purchases whose state changed. `purchases` is
    /// `None` when the backend reported no batch at all, which is distinct
    /// from an empty one.
    PurchasesUpdated {
        status: ResponseCode,
        purchases: Option<Vec<PurchaseRecord>>,
    },
    /// An established connection was lost.
    ServiceDisconnected,
}

/// Operations of the billing backend.
///
/// Every method except [`BillingBackend::disconnect`] and
/// [`BillingBackend::launch_purchase_flow`] may take arbitrarily long. A
/// non-OK status is returned as `Err(code)`.
///
/// # Example
///
/// For example code see [crate::backend::memory::InMemoryBackend]
#[async_trait]
pub trait BillingBackend: Send + Sync + 'static {
    /// Starts one connection attempt and resolves once setup finished.
    ///
    /// The session never issues a second `connect` while one is in flight.
    async fn connect(&self) -> Result<(), ResponseCode>;

    /// Ends the connection.
    fn disconnect(&self);

    async fn query_product_details(
        &self,
        identifiers: &[String],
        product_type: ProductType,
    ) -> Result<Vec<ProductDetails>, ResponseCode>;

    /// Returns the purchases currently owned for `product_type`.
    async fn query_owned_purchases(
        &self,
        product_type: ProductType,
    ) -> Result<Vec<PurchaseRecord>, ResponseCode>;

    /// Launches the purchase flow for `identifier`.
    ///
    /// Returns as soon as the flow was (or could not be) launched. The
    /// outcome of the flow itself arrives later as
    /// [`BillingEvent::PurchasesUpdated`], pushed through the event channel.
    /// It must never be delivered to the session from within this call.
    fn launch_purchase_flow(
        &self,
        identifier: &str,
        product_type: ProductType,
    ) -> Result<(), ResponseCode>;

    async fn consume(&self, purchase_token: &str) -> Result<(), ResponseCode>;
}
