//! Outbound operations of the order saga.
//!
//! [`OrderActivities`] is the capability set the saga needs from the
//! outside world. One implementation exists per backend; it is handed to the
//! orchestrator at construction.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId};
use domain::{Money, OrderStatus, ProductId};

use crate::error::ActivityError;

pub use memory::{ActivityCall, FailureMode, InMemoryOrderActivities, Operation};

/// Per-attempt context passed to every activity invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityContext {
    key: IdempotencyKey,
    attempt: u32,
}

impl ActivityContext {
    /// Creates a context for one attempt.
    pub fn new(key: IdempotencyKey, attempt: u32) -> Self {
        Self { key, attempt }
    }

    /// Returns the idempotency key. Identical for every attempt of the same
    /// step execution, including attempts made after a restart.
    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.key
    }

    /// Returns the 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Side-effecting operations invoked by the saga.
///
/// Implementations must treat a repeated idempotency key as the same
/// request.
#[async_trait]
pub trait OrderActivities: Send + Sync {
    /// Records the order with the given status.
    async fn create_order_record(
        &self,
        ctx: &ActivityContext,
        order_id: OrderId,
        status: OrderStatus,
        created_at: DateTime<Utc>,
    ) -> Result<(), ActivityError>;

    /// Charges `amount`. A negative amount is a refund.
    async fn process_payment(
        &self,
        ctx: &ActivityContext,
        order_id: OrderId,
        amount: Money,
    ) -> Result<(), ActivityError>;

    /// Decrements inventory for the ordered products.
    async fn update_inventory(
        &self,
        ctx: &ActivityContext,
        order_id: OrderId,
        products: &[ProductId],
    ) -> Result<(), ActivityError>;

    /// Notifies the customer about the order.
    async fn notify_customer(
        &self,
        ctx: &ActivityContext,
        order_id: OrderId,
    ) -> Result<(), ActivityError>;

    /// Called once the order's saga is archived. No further invocation for
    /// the order follows, so per-order state such as deduplication keys can
    /// be dropped.
    async fn release(&self, _order_id: OrderId) {}
}
