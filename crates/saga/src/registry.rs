//! Per-order execution leases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::OrderId;

use crate::error::SagaError;
use crate::multiplexer::Mailbox;

/// Tracks which sagas are being driven by this process.
///
/// At most one [`SagaLease`] exists per order id. The lease owns the saga's
/// mailbox; dropping it closes the mailbox and frees the id.
#[derive(Debug, Clone, Default)]
pub struct SagaRegistry {
    running: Arc<Mutex<HashMap<OrderId, Mailbox>>>,
}

impl SagaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants the exclusive right to drive the saga for `order_id`.
    pub fn acquire(&self, order_id: OrderId) -> Result<SagaLease, SagaError> {
        let mut running = self.lock();
        if running.contains_key(&order_id) {
            return Err(SagaError::AlreadyRunning(order_id));
        }
        let mailbox = Mailbox::new(order_id);
        running.insert(order_id, mailbox.clone());
        Ok(SagaLease {
            order_id,
            mailbox,
            registry: self.clone(),
        })
    }

    /// Returns the mailbox of a running saga.
    pub fn mailbox(&self, order_id: OrderId) -> Option<Mailbox> {
        self.lock().get(&order_id).cloned()
    }

    /// Returns the number of sagas currently leased.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no saga is leased.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Closes every mailbox so that waiting sagas return.
    pub fn close_all(&self) {
        let mailboxes: Vec<Mailbox> = self.lock().values().cloned().collect();
        for mailbox in mailboxes {
            mailbox.close();
        }
    }

    fn release(&self, order_id: OrderId) {
        self.lock().remove(&order_id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OrderId, Mailbox>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to drive one saga.
#[derive(Debug)]
pub struct SagaLease {
    order_id: OrderId,
    mailbox: Mailbox,
    registry: SagaRegistry,
}

impl SagaLease {
    /// Returns the leased order id.
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Returns the saga's mailbox.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}

impl Drop for SagaLease {
    fn drop(&mut self) {
        self.mailbox.close();
        self.registry.release(self.order_id);
    }
}
