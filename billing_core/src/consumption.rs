// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use log::{info, warn};
use tokio::{runtime::Handle, task::JoinHandle};

use crate::backend::BillingBackend;

/// Fires the backend's consume operation for purchases that asked for it.
///
/// Consumption is fire-and-forget: the outcome is logged and never reaches
/// a caller, and failures are not retried.
pub struct ConsumptionDispatcher<B> {
    backend: Arc<B>,
    runtime: Option<Handle>,
}

impl<B: BillingBackend> ConsumptionDispatcher<B> {
    /// Creates a dispatcher bound to the runtime it is created on, if any.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Creates a dispatcher that spawns its consumptions on `runtime`.
    pub fn with_runtime(backend: Arc<B>, runtime: Handle) -> Self {
        Self {
            backend,
            runtime: Some(runtime),
        }
    }

    /// Starts consuming `purchase_token`. The returned handle may be dropped.
    ///
    /// Can be called from any thread. Returns `None`, and consumes nothing,
    /// when neither a bound runtime nor a current one is available.
    pub fn consume(&self, purchase_token: String) -> Option<JoinHandle<()>> {
        let Some(runtime) = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            warn!("No runtime to consume {purchase_token} on, skipping");
            return None;
        };

        let backend = Arc::clone(&self.backend);
        Some(runtime.spawn(async move {
            match backend.consume(&purchase_token).await {
                Ok(()) => info!("Consumed purchase {purchase_token}"),
                Err(code) => warn!(
                    "Failed to consume {purchase_token} with error {code} ({})",
                    code.name().unwrap_or("unknown")
                ),
            }
        }))
    }
}
