// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Delivery of backend notifications to the hosted session, with metrics.

use std::sync::Arc;

use billing_core::{
    backend::{BillingBackend, BillingEvent},
    session::{BillingSession, UpdateReport},
};
use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};
use tokio::{sync::mpsc, task::JoinHandle};

lazy_static! {
    static ref PURCHASE_UPDATES_COUNTER: IntCounter = register_int_counter!(
        "purchase_updates_count",
        "Number of purchase-update notifications processed."
    )
    .unwrap();
    static ref PURCHASES_RESOLVED_COUNTER: IntCounter = register_int_counter!(
        "purchases_resolved_count",
        "Number of waiting purchase calls answered with a batch."
    )
    .unwrap();
    static ref PURCHASES_REJECTED_COUNTER: IntCounter = register_int_counter!(
        "purchases_rejected_count",
        "Number of waiting purchase calls answered with a failure."
    )
    .unwrap();
    static ref CONSUMPTIONS_COUNTER: IntCounter = register_int_counter!(
        "consumptions_dispatched_count",
        "Number of consume requests sent to the backend."
    )
    .unwrap();
    static ref DISCONNECTS_COUNTER: IntCounter = register_int_counter!(
        "service_disconnects_count",
        "Number of times the backend reported a lost connection."
    )
    .unwrap();
}

/// Drains `events` into `session` on one task, in order, counting what every
/// notification did.
///
/// Stops once the channel closes or the session is gone.
pub fn spawn_event_pump<B: BillingBackend>(
    session: &Arc<BillingSession<B>>,
    events: mpsc::UnboundedReceiver<BillingEvent>,
) -> JoinHandle<()> {
    session.spawn_event_loop_with(events, record_event)
}

fn record_event(report: Option<&UpdateReport>) {
    match report {
        Some(report) => {
            PURCHASE_UPDATES_COUNTER.inc();
            PURCHASES_RESOLVED_COUNTER.inc_by(report.outcome.resolved as u64);
            PURCHASES_REJECTED_COUNTER.inc_by(report.outcome.rejected as u64);
            CONSUMPTIONS_COUNTER.inc_by(report.consumptions.len() as u64);
        }
        None => DISCONNECTS_COUNTER.inc(),
    }
}
