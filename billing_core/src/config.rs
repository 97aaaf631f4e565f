// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Tunables of a [`crate::session::BillingSession`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a purchase or subscribe call waits for its purchase-update
    /// notification before giving up. `None` waits indefinitely, which is
    /// what the backend contract implies; a flow the user abandons may then
    /// never be answered.
    pub pending_purchase_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn with_pending_purchase_timeout(mut self, timeout: Duration) -> Self {
        self.pending_purchase_timeout = Some(timeout);
        self
    }
}
