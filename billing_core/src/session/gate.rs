// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;

use log::debug;

use super::connection::ConnectionSession;
use crate::{backend::BillingBackend, Error};

impl<B: BillingBackend> ConnectionSession<B> {
    /// Defers `op` until the backend is connected.
    ///
    /// Every externally invocable operation goes through here. If the
    /// connection cannot be established, `op` never runs and the caller is
    /// answered with [`Error::ServiceUnavailable`].
    pub async fn with_connection<F, Fut, T>(&self, op: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if let Err(err) = self.ensure_connected().await {
            debug!("Failed to setup billing service!");
            return Err(err);
        }
        op().await
    }
}
