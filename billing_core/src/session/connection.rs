// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Connection state machine for the billing backend.
//!
//! ```text
//! Disconnected --ensure_connected--> Connecting --OK--> Connected
//!       ^                                |                  |
//!       +------------ failure -----------+                  |
//!       +---------- disconnect notification / terminate ----+
//! ```
//!
//! A dropped connection always goes back to `Disconnected`. Nothing
//! reconnects on its own; the next operation does.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use tokio::sync::oneshot;

use crate::{backend::BillingBackend, Error, ResponseCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Inner {
    state: ConnectionState,
    /// Callers waiting on the attempt in flight.
    waiters: Vec<oneshot::Sender<Result<(), ResponseCode>>>,
}

pub struct ConnectionSession<B> {
    backend: Arc<B>,
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: BillingBackend> ConnectionSession<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                waiters: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    /// Resolves once the backend is connected.
    ///
    /// Returns immediately, without touching the backend, when already
    /// connected. Otherwise joins the attempt in flight or starts a new one;
    /// every concurrent caller gets the outcome of the same single attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] if the attempt failed.
    pub async fn ensure_connected(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        let start_attempt = {
            let mut inner = lock(&self.inner);
            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    inner.waiters.push(tx);
                    false
                }
                ConnectionState::Disconnected => {
                    inner.state = ConnectionState::Connecting;
                    inner.waiters.push(tx);
                    true
                }
            }
        };

        if start_attempt {
            self.spawn_attempt();
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(code)) => {
                debug!("Connection attempt failed with code {code}");
                Err(Error::ServiceUnavailable)
            }
            Err(_) => Err(Error::ServiceUnavailable),
        }
    }

    // The attempt outlives any single caller, so a cancelled caller never
    // leaves the state stuck in `Connecting`.
    fn spawn_attempt(&self) {
        let backend = Arc::clone(&self.backend);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = backend.connect().await;
            let code = result.err().unwrap_or(ResponseCode::OK);
            info!(
                "Billing service was setup with code {code} ({})",
                code.name().unwrap_or("unknown")
            );

            let waiters = {
                let mut inner = lock(&inner);
                inner.state = if result.is_ok() {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                };
                std::mem::take(&mut inner.waiters)
            };
            for waiter in waiters {
                // A caller that gave up waiting is fine to skip.
                let _ = waiter.send(result);
            }
        });
    }

    /// Handles the backend's "service disconnected" notification.
    pub fn on_service_disconnected(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == ConnectionState::Connected {
            info!("Billing service was disconnected!");
            inner.state = ConnectionState::Disconnected;
        }
    }

    /// Disconnects if connected. No-op in any other state.
    pub fn terminate(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == ConnectionState::Connected {
            info!("Stopping billing service.");
            self.backend.disconnect();
            inner.state = ConnectionState::Disconnected;
        }
    }
}
