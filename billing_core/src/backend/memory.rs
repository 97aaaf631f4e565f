// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory billing backend.
//!
//! This module provides a scriptable implementation of [`BillingBackend`].
//! It is useful for testing and development purposes: it keeps a product
//! catalog and the owned purchases in memory, and simulates purchase flows
//! by pushing [`BillingEvent`]s into the session's event channel.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        PoisonError, RwLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};

use super::{BillingBackend, BillingEvent, ProductType};
use crate::{product::ProductDetails, purchase::PurchaseRecord, ResponseCode};

/// A product offered by the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub identifier: String,
    pub product_type: ProductType,
    pub price: String,
    #[serde(default)]
    pub introductory_price: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub currency: String,
    pub price_amount_micros: i64,
}

impl CatalogEntry {
    fn details(&self) -> ProductDetails {
        ProductDetails {
            sku: self.identifier.clone(),
            price: self.price.clone(),
            introductory_price: self.introductory_price.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            price_currency_code: self.currency.clone(),
            price_amount_micros: self.price_amount_micros,
        }
    }
}

/// What a launched purchase flow does once the "user" is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowOutcome {
    /// The purchase completes and an OK batch with the new purchase is emitted.
    #[default]
    Complete,
    /// The user backs out; a USER_CANCELED update without a batch is emitted.
    Cancel,
    /// Nothing is emitted; the test drives updates through [`InMemoryBackend::emit`].
    Manual,
}

pub struct InMemoryBackend {
    package_name: String,
    catalog: RwLock<HashMap<String, CatalogEntry>>,
    owned: RwLock<Vec<(ProductType, PurchaseRecord)>>,
    events: mpsc::UnboundedSender<BillingEvent>,
    connected: AtomicBool,
    connect_result: RwLock<Result<(), ResponseCode>>,
    hold_connect: AtomicBool,
    connect_release: Notify,
    flow_outcome: RwLock<FlowOutcome>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    launched_flows: RwLock<Vec<String>>,
    consume_requests: RwLock<Vec<String>>,
    next_order: AtomicU64,
}

impl InMemoryBackend {
    pub fn new(
        package_name: impl Into<String>,
        events: mpsc::UnboundedSender<BillingEvent>,
    ) -> Self {
        InMemoryBackend {
            package_name: package_name.into(),
            catalog: RwLock::new(HashMap::new()),
            owned: RwLock::new(Vec::new()),
            events,
            connected: AtomicBool::new(false),
            connect_result: RwLock::new(Ok(())),
            hold_connect: AtomicBool::new(false),
            connect_release: Notify::new(),
            flow_outcome: RwLock::new(FlowOutcome::default()),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            launched_flows: RwLock::new(Vec::new()),
            consume_requests: RwLock::new(Vec::new()),
            next_order: AtomicU64::new(0),
        }
    }

    pub fn with_catalog(self, entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        for entry in entries {
            self.add_product(entry);
        }
        self
    }

    pub fn add_product(&self, entry: CatalogEntry) {
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.identifier.clone(), entry);
    }

    /// Result of every following `connect` call.
    pub fn set_connect_result(&self, result: Result<(), ResponseCode>) {
        *self
            .connect_result
            .write()
            .unwrap_or_else(PoisonError::into_inner) = result;
    }

    /// When held, `connect` does not finish until [`Self::release_connection`].
    pub fn hold_connections(&self, hold: bool) {
        self.hold_connect.store(hold, Ordering::SeqCst);
    }

    /// Lets one held `connect` finish. A release issued before the attempt
    /// starts is remembered.
    pub fn release_connection(&self) {
        self.connect_release.notify_one();
    }

    pub fn set_flow_outcome(&self, outcome: FlowOutcome) {
        *self
            .flow_outcome
            .write()
            .unwrap_or_else(PoisonError::into_inner) = outcome;
    }

    /// Pushes an arbitrary event to the session. Returns `false` once the
    /// session stopped listening.
    pub fn emit(&self, event: BillingEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Drops the connection the way the platform would.
    pub fn simulate_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(BillingEvent::ServiceDisconnected);
    }

    /// Records an owned purchase without running a flow or emitting anything.
    pub fn grant_purchase(&self, identifier: &str, product_type: ProductType) -> PurchaseRecord {
        let record = self.new_record(identifier, product_type);
        self.owned
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((product_type, record.clone()));
        record
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn launched_flows(&self) -> Vec<String> {
        self.launched_flows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every token `consume` was called with, in call order.
    pub fn consume_requests(&self) -> Vec<String> {
        self.consume_requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn new_record(&self, identifier: &str, product_type: ProductType) -> PurchaseRecord {
        let n = self.next_order.fetch_add(1, Ordering::SeqCst);
        let purchase_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default();
        PurchaseRecord {
            order_id: format!("GPA.0000-0000-{n:04}"),
            package_name: self.package_name.clone(),
            sku: identifier.to_string(),
            purchase_token: format!("{}.{identifier}.{n}", self.package_name),
            purchase_time,
            auto_renewing: product_type == ProductType::Subs,
        }
    }

    fn ensure_ready(&self) -> Result<(), ResponseCode> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ResponseCode::SERVICE_DISCONNECTED)
        }
    }

    fn complete_flow(&self, identifier: &str, product_type: ProductType) {
        let already_owned = self
            .owned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(owned_type, record)| *owned_type == product_type && record.sku == identifier);

        let event = if already_owned {
            BillingEvent::PurchasesUpdated {
                status: ResponseCode::ITEM_ALREADY_OWNED,
                purchases: None,
            }
        } else {
            let record = self.grant_purchase(identifier, product_type);
            BillingEvent::PurchasesUpdated {
                status: ResponseCode::OK,
                purchases: Some(vec![record]),
            }
        };
        self.emit(event);
    }
}

#[async_trait]
impl BillingBackend for InMemoryBackend {
    async fn connect(&self) -> Result<(), ResponseCode> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_connect.load(Ordering::SeqCst) {
            self.connect_release.notified().await;
        }

        let result = *self
            .connect_result
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.connected.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn query_product_details(
        &self,
        identifiers: &[String],
        product_type: ProductType,
    ) -> Result<Vec<ProductDetails>, ResponseCode> {
        self.ensure_ready()?;
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        Ok(identifiers
            .iter()
            .filter_map(|identifier| catalog.get(identifier))
            .filter(|entry| entry.product_type == product_type)
            .map(CatalogEntry::details)
            .collect())
    }

    async fn query_owned_purchases(
        &self,
        product_type: ProductType,
    ) -> Result<Vec<PurchaseRecord>, ResponseCode> {
        self.ensure_ready()?;
        Ok(self
            .owned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(owned_type, _)| *owned_type == product_type)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn launch_purchase_flow(
        &self,
        identifier: &str,
        product_type: ProductType,
    ) -> Result<(), ResponseCode> {
        self.ensure_ready()?;
        let offered = self
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .is_some_and(|entry| entry.product_type == product_type);
        if !offered {
            return Err(ResponseCode::ITEM_UNAVAILABLE);
        }

        self.launched_flows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(identifier.to_string());

        let outcome = *self.flow_outcome.read().unwrap_or_else(PoisonError::into_inner);
        debug!("Purchase flow for {identifier} launched, outcome {outcome:?}");
        match outcome {
            FlowOutcome::Complete => self.complete_flow(identifier, product_type),
            FlowOutcome::Cancel => {
                self.emit(BillingEvent::PurchasesUpdated {
                    status: ResponseCode::USER_CANCELED,
                    purchases: None,
                });
            }
            FlowOutcome::Manual => {}
        }
        Ok(())
    }

    async fn consume(&self, purchase_token: &str) -> Result<(), ResponseCode> {
        self.consume_requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(purchase_token.to_string());
        self.ensure_ready()?;

        let mut owned = self.owned.write().unwrap_or_else(PoisonError::into_inner);
        let position = owned.iter().position(|(product_type, record)| {
            *product_type == ProductType::InApp && record.purchase_token == purchase_token
        });
        match position {
            Some(index) => {
                owned.remove(index);
                Ok(())
            }
            None => Err(ResponseCode::ITEM_NOT_OWNED),
        }
    }
}
