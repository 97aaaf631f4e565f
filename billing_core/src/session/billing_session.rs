// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc,
        oneshot::{self, error::RecvError},
    },
    task::JoinHandle,
};

use super::connection::{ConnectionSession, ConnectionState};
use crate::{
    backend::{BillingBackend, BillingEvent, ProductType},
    consumption::ConsumptionDispatcher,
    correlator::{PurchaseCorrelator, PurchaseResult, Ticket, UpdateOutcome},
    product::{products_from_details, Product},
    purchase::{purchases_from_records, Purchase, PurchaseRecord},
    Error, ResponseCode, SessionConfig,
};

/// Result of handing one purchase-update notification to the session.
#[derive(Debug)]
pub struct UpdateReport {
    pub outcome: UpdateOutcome,
    /// One task per consume dispatched. Dropping them does not cancel.
    pub consumptions: Vec<JoinHandle<()>>,
}

// Every registered sender is answered before it is removed, so a closed
// channel only follows a bug elsewhere; it is reported as a generic failure.
fn answered(result: Result<PurchaseResult, RecvError>) -> PurchaseResult {
    result.unwrap_or(Err(Error::PurchaseFailed {
        code: ResponseCode::ERROR,
    }))
}

pub struct BillingSession<B> {
    backend: Arc<B>,
    connection: ConnectionSession<B>,
    correlator: Mutex<PurchaseCorrelator>,
    consumption: ConsumptionDispatcher<B>,
    config: SessionConfig,
}

impl<B: BillingBackend> BillingSession<B> {
    /// Creates a disconnected session. Nothing talks to the backend until
    /// [`Self::start`] or the first operation.
    ///
    /// Consumptions are spawned on the runtime current at creation; use
    /// [`Self::with_runtime`] to create the session elsewhere.
    pub fn new(backend: Arc<B>, config: SessionConfig) -> Self {
        let consumption = ConsumptionDispatcher::new(Arc::clone(&backend));
        Self::build(backend, config, consumption)
    }

    /// Like [`Self::new`], with consumptions spawned on `runtime`. Lets
    /// [`Self::handle_event`] be called from threads outside any runtime.
    pub fn with_runtime(backend: Arc<B>, config: SessionConfig, runtime: Handle) -> Self {
        let consumption = ConsumptionDispatcher::with_runtime(Arc::clone(&backend), runtime);
        Self::build(backend, config, consumption)
    }

    fn build(
        backend: Arc<B>,
        config: SessionConfig,
        consumption: ConsumptionDispatcher<B>,
    ) -> Self {
        Self {
            connection: ConnectionSession::new(Arc::clone(&backend)),
            correlator: Mutex::new(PurchaseCorrelator::new()),
            consumption,
            backend,
            config,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Number of purchase and subscribe calls still waiting on a notification.
    pub fn pending_purchases(&self) -> usize {
        self.correlator().pending_len()
    }

    fn correlator(&self) -> MutexGuard<'_, PurchaseCorrelator> {
        self.correlator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects eagerly. The outcome is only logged; a failure here is retried
    /// by the next operation.
    pub async fn start(&self) {
        match self.connection.ensure_connected().await {
            Ok(()) => info!("Billing service is ready."),
            Err(_) => warn!("Failed to setup billing service!"),
        }
    }

    /// Disconnects from the backend, typically when the host is going away.
    ///
    /// Callers still waiting on a purchase are left waiting.
    pub fn terminate(&self) {
        self.connection.terminate();
    }

    /// Looks up product details for `identifiers`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] if the backend could not be
    /// connected, and [`Error::FetchProducts`] if the query failed.
    pub async fn fetch_products(
        &self,
        identifiers: Vec<String>,
        product_type: ProductType,
    ) -> Result<Vec<Product>, Error> {
        self.connection
            .with_connection(|| async {
                let details = self
                    .backend
                    .query_product_details(&identifiers, product_type)
                    .await
                    .map_err(|code| Error::FetchProducts { code })?;
                Ok(products_from_details(&details))
            })
            .await
    }

    /// Currently owned one-time purchases.
    pub async fn fetch_purchases(&self) -> Result<Vec<Purchase>, Error> {
        self.fetch_owned(ProductType::InApp).await
    }

    /// Currently owned subscriptions, including ones whose auto renewal was
    /// turned off but which may still be within their paid period.
    pub async fn fetch_subscriptions(&self) -> Result<Vec<Purchase>, Error> {
        self.fetch_owned(ProductType::Subs).await
    }

    async fn fetch_owned(&self, product_type: ProductType) -> Result<Vec<Purchase>, Error> {
        self.connection
            .with_connection(|| async {
                let records = self
                    .backend
                    .query_owned_purchases(product_type)
                    .await
                    .map_err(|code| Error::QueryPurchases { code })?;
                Ok(purchases_from_records(&records))
            })
            .await
    }

    /// Buys a one-time product and resolves with the batch of purchases its
    /// purchase-update notification carried.
    ///
    /// With `consume` set, the purchase is consumed once the backend reports
    /// it, regardless of whether this call is still waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] if the backend could not be
    /// connected, [`Error::LaunchFlow`] if the flow did not start, and
    /// [`Error::PurchaseFailed`] if the notification reported a failure.
    pub async fn purchase(&self, identifier: &str, consume: bool) -> PurchaseResult {
        self.correlator().request_consume(identifier, consume);
        self.launch_and_wait(identifier, ProductType::InApp).await
    }

    /// Subscribes to `identifier`; see [`Self::purchase`].
    pub async fn subscribe(&self, identifier: &str) -> PurchaseResult {
        self.launch_and_wait(identifier, ProductType::Subs).await
    }

    async fn launch_and_wait(&self, identifier: &str, product_type: ProductType) -> PurchaseResult {
        self.connection
            .with_connection(|| async {
                // Launch and registration happen under the correlator lock so
                // no notification can slip in between them.
                let (ticket, rx) = {
                    let mut correlator = self.correlator();
                    self.backend
                        .launch_purchase_flow(identifier, product_type)
                        .map_err(|code| Error::LaunchFlow {
                            action: product_type.into(),
                            code,
                        })?;
                    correlator.register_pending(identifier)
                };
                debug!("Purchase flow for {identifier} launched, waiting for update");
                self.wait_for_update(identifier, ticket, rx).await
            })
            .await
    }

    async fn wait_for_update(
        &self,
        identifier: &str,
        ticket: Ticket,
        mut rx: oneshot::Receiver<PurchaseResult>,
    ) -> PurchaseResult {
        let Some(timeout) = self.config.pending_purchase_timeout else {
            return answered(rx.await);
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(result) => answered(result),
            Err(_) => {
                let expired = self.correlator().expire(identifier, ticket);
                if expired {
                    warn!("No purchase update for {identifier} within {timeout:?}");
                    Err(Error::PendingTimeout {
                        identifier: identifier.to_string(),
                        timeout,
                    })
                } else {
                    // Answered or replaced right as the timer fired.
                    answered(rx.await)
                }
            }
        }
    }

    /// Processes one purchase-update notification: dispatches the requested
    /// consumptions, then resolves or rejects the waiting callers.
    pub fn on_purchases_updated(
        &self,
        status: ResponseCode,
        purchases: Option<Vec<PurchaseRecord>>,
    ) -> UpdateReport {
        let outcome = self
            .correlator()
            .on_purchase_update(status, purchases.as_deref());

        let consumptions = outcome
            .consume_tokens
            .iter()
            .filter_map(|token| self.consumption.consume(token.clone()))
            .collect();

        debug!(
            "Purchase update with code {status}: {} resolved, {} rejected",
            outcome.resolved, outcome.rejected
        );
        UpdateReport {
            outcome,
            consumptions,
        }
    }

    /// Delivers one backend notification. Notifications must be delivered one
    /// at a time, in the order the backend produced them.
    ///
    /// Returns the report of a purchase update, `None` for anything else.
    pub fn handle_event(&self, event: BillingEvent) -> Option<UpdateReport> {
        match event {
            BillingEvent::PurchasesUpdated { status, purchases } => {
                Some(self.on_purchases_updated(status, purchases))
            }
            BillingEvent::ServiceDisconnected => {
                self.connection.on_service_disconnected();
                None
            }
        }
    }

    /// Drains `events` on a single task, strictly in order.
    ///
    /// The task only holds a weak reference: it stops once the session is
    /// dropped or the channel closes.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<BillingEvent>,
    ) -> JoinHandle<()> {
        self.spawn_event_loop_with(events, |_| {})
    }

    /// [`Self::spawn_event_loop`], calling `observe` after every event with
    /// what [`Self::handle_event`] returned for it.
    pub fn spawn_event_loop_with<F>(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<BillingEvent>,
        mut observe: F,
    ) -> JoinHandle<()>
    where
        F: FnMut(Option<&UpdateReport>) + Send + 'static,
    {
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                let report = session.handle_event(event);
                observe(report.as_ref());
            }
            debug!("Billing event loop stopped");
        })
    }
}
