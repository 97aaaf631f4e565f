// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The `session` module owns everything tied to one application session
//! with the billing backend: the connection state machine, the waiting
//! purchase callers and the pending consume requests.
//!
//! [`BillingSession`] should be the primary interface of the host. Every
//! operation it exposes is deferred until the backend is connected, and the
//! purchase operations are answered from the backend's asynchronous
//! purchase-update notifications, which the host feeds in through
//! [`BillingSession::spawn_event_loop`] or [`BillingSession::handle_event`].

mod billing_session;
pub mod connection;
mod gate;

pub use billing_session::{BillingSession, UpdateReport};
pub use connection::{ConnectionSession, ConnectionState};
