// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Correlation of purchase-update notifications with waiting callers.
//!
//! The backend reports the outcome of a purchase flow as an unsolicited
//! batch, not as a response to the call that launched it. Waiting callers
//! are therefore keyed by product identifier: at most one caller waits per
//! identifier, and every purchase in an OK batch resolves the caller waiting
//! on its identifier with the *whole* converted batch.
//!
//! Consume requests are tracked alongside, also per identifier, and are
//! honoured whenever the identifier shows up in a batch, whether or not
//! anyone is still waiting on it.

use std::collections::HashMap;

use log::{debug, warn};
use tokio::sync::oneshot;

use crate::{
    purchase::{purchases_from_records, Purchase, PurchaseRecord},
    Error, ResponseCode,
};

pub type PurchaseResult = Result<Vec<Purchase>, Error>;

/// Identifies one registration, so a caller that gives up only removes its
/// own entry and never a newer one for the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

struct PendingPurchase {
    ticket: Ticket,
    result: oneshot::Sender<PurchaseResult>,
}

/// What one purchase-update notification did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Tokens of purchases whose consumption was requested, in batch order.
    pub consume_tokens: Vec<String>,
    pub resolved: usize,
    pub rejected: usize,
}

#[derive(Default)]
pub struct PurchaseCorrelator {
    pending: HashMap<String, PendingPurchase>,
    consume_requests: HashMap<String, bool>,
    next_ticket: u64,
}

impl PurchaseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records whether a purchase of `identifier` should be consumed once it
    /// is reported. Last write wins.
    pub fn request_consume(&mut self, identifier: &str, consume: bool) {
        self.consume_requests.insert(identifier.to_string(), consume);
    }

    /// Registers a caller waiting on the outcome of a launched flow.
    ///
    /// A caller already waiting on the same identifier is rejected with
    /// [`Error::Superseded`], so it still gets exactly one answer.
    pub fn register_pending(
        &mut self,
        identifier: &str,
    ) -> (Ticket, oneshot::Receiver<PurchaseResult>) {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        let (tx, rx) = oneshot::channel();
        let displaced = self.pending.insert(
            identifier.to_string(),
            PendingPurchase { ticket, result: tx },
        );
        if let Some(displaced) = displaced {
            warn!("A pending request for {identifier} was replaced by a newer one");
            let _ = displaced.result.send(Err(Error::Superseded {
                identifier: identifier.to_string(),
            }));
        }
        (ticket, rx)
    }

    /// Removes the entry for `identifier` if it still belongs to `ticket`.
    /// Returns `false` when it was already resolved or replaced.
    pub fn expire(&mut self, identifier: &str, ticket: Ticket) -> bool {
        match self.pending.get(identifier) {
            Some(entry) if entry.ticket == ticket => {
                self.pending.remove(identifier);
                true
            }
            _ => false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, identifier: &str) -> bool {
        self.pending.contains_key(identifier)
    }

    pub fn consume_requested(&self, identifier: &str) -> Option<bool> {
        self.consume_requests.get(identifier).copied()
    }

    /// Processes one purchase-update notification.
    ///
    /// Must be called in the order the backend delivered the notifications.
    pub fn on_purchase_update(
        &mut self,
        status: ResponseCode,
        purchases: Option<&[PurchaseRecord]>,
    ) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        if let Some(records) = purchases {
            debug!("onPurchasesUpdated(): num: {}", records.len());
            for record in records {
                if self.consume_requests.remove(&record.sku) == Some(true) {
                    debug!("onPurchasesUpdated(): consuming. token {}", record.purchase_token);
                    outcome.consume_tokens.push(record.purchase_token.clone());
                }
            }
        }

        match purchases {
            Some(records) if status.is_ok() => {
                let batch = purchases_from_records(records);
                for purchase in &batch {
                    debug!("onPurchasesUpdated(): id: {}", purchase.identifier);
                    if let Some(entry) = self.pending.remove(&purchase.identifier) {
                        if entry.result.send(Ok(batch.clone())).is_err() {
                            debug!("Caller for {} stopped waiting", purchase.identifier);
                        }
                        outcome.resolved += 1;
                    }
                }
            }
            _ => {
                for (_, entry) in self.pending.drain() {
                    let _ = entry.result.send(Err(Error::PurchaseFailed { code: status }));
                    outcome.rejected += 1;
                }
            }
        }

        outcome
    }
}
