//! In-memory activity backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId};
use domain::{Money, OrderStatus, ProductId};

use super::{ActivityContext, OrderActivities};
use crate::error::ActivityError;

/// The operations of [`OrderActivities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateOrderRecord,
    ProcessPayment,
    UpdateInventory,
    NotifyCustomer,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::CreateOrderRecord => "create_order_record",
            Operation::ProcessPayment => "process_payment",
            Operation::UpdateInventory => "update_inventory",
            Operation::NotifyCustomer => "notify_customer",
        };
        f.write_str(name)
    }
}

/// Injected failure behavior for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Fail the next `n` invocations with a transient error.
    Times(u32),
    /// Fail every invocation with a transient error.
    Always,
    /// Fail every invocation with a non-retryable error.
    Permanent,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityCall {
    CreateOrderRecord {
        order_id: OrderId,
        status: OrderStatus,
        key: IdempotencyKey,
        attempt: u32,
    },
    ProcessPayment {
        order_id: OrderId,
        amount: Money,
        key: IdempotencyKey,
        attempt: u32,
    },
    UpdateInventory {
        order_id: OrderId,
        products: Vec<ProductId>,
        key: IdempotencyKey,
        attempt: u32,
    },
    NotifyCustomer {
        order_id: OrderId,
        key: IdempotencyKey,
        attempt: u32,
    },
}

impl ActivityCall {
    /// Returns the invoked operation.
    pub fn operation(&self) -> Operation {
        match self {
            ActivityCall::CreateOrderRecord { .. } => Operation::CreateOrderRecord,
            ActivityCall::ProcessPayment { .. } => Operation::ProcessPayment,
            ActivityCall::UpdateInventory { .. } => Operation::UpdateInventory,
            ActivityCall::NotifyCustomer { .. } => Operation::NotifyCustomer,
        }
    }

    /// Returns the idempotency key the call carried.
    pub fn key(&self) -> &IdempotencyKey {
        match self {
            ActivityCall::CreateOrderRecord { key, .. }
            | ActivityCall::ProcessPayment { key, .. }
            | ActivityCall::UpdateInventory { key, .. }
            | ActivityCall::NotifyCustomer { key, .. } => key,
        }
    }

    /// Returns the order the call was for.
    pub fn order_id(&self) -> OrderId {
        match self {
            ActivityCall::CreateOrderRecord { order_id, .. }
            | ActivityCall::ProcessPayment { order_id, .. }
            | ActivityCall::UpdateInventory { order_id, .. }
            | ActivityCall::NotifyCustomer { order_id, .. } => *order_id,
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryActivitiesState {
    /// Keep the call log and the effects of released orders.
    retain_history: bool,
    calls: Vec<ActivityCall>,
    failures: HashMap<Operation, FailureMode>,
    latency: HashMap<Operation, Duration>,
    /// Keys of invocations that took effect, per order.
    applied: HashMap<OrderId, HashSet<IdempotencyKey>>,
    records: HashMap<OrderId, OrderStatus>,
    payments: Vec<(OrderId, Money)>,
    inventory_updates: Vec<(OrderId, Vec<ProductId>)>,
    notifications: Vec<OrderId>,
}

/// In-memory [`OrderActivities`].
///
/// Supports fault injection and simulated latency per operation. Effects
/// are deduplicated by idempotency key, so retries and re-invocations after
/// recovery are applied once.
///
/// A backend from [`new`](Self::new) records every call and keeps every
/// effect for inspection. One from [`simulated`](Self::simulated) keeps no
/// call log and forgets an order once its saga is released, so a
/// long-running server holds state only for unfinished orders.
#[derive(Debug, Clone)]
pub struct InMemoryOrderActivities {
    state: Arc<RwLock<InMemoryActivitiesState>>,
}

impl Default for InMemoryOrderActivities {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrderActivities {
    /// Creates a recording backend with no latency and no failures.
    pub fn new() -> Self {
        Self::with_history(true)
    }

    fn with_history(retain_history: bool) -> Self {
        let state = InMemoryActivitiesState {
            retain_history,
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Creates a non-recording backend with realistic latencies for running
    /// the server standalone.
    pub fn simulated() -> Self {
        let activities = Self::with_history(false);
        activities.set_latency(Operation::CreateOrderRecord, Duration::from_millis(100));
        activities.set_latency(Operation::ProcessPayment, Duration::from_millis(200));
        activities.set_latency(Operation::UpdateInventory, Duration::from_millis(150));
        activities.set_latency(Operation::NotifyCustomer, Duration::from_millis(100));
        activities
    }

    /// Sets the latency of every invocation of `operation`.
    pub fn set_latency(&self, operation: Operation, latency: Duration) {
        self.write().latency.insert(operation, latency);
    }

    /// Injects a failure mode for `operation`.
    pub fn set_failure(&self, operation: Operation, mode: FailureMode) {
        self.write().failures.insert(operation, mode);
    }

    /// Removes any injected failure for `operation`.
    pub fn clear_failure(&self, operation: Operation) {
        self.write().failures.remove(&operation);
    }

    /// Returns every recorded call in invocation order.
    pub fn calls(&self) -> Vec<ActivityCall> {
        self.read(|s| s.calls.clone())
    }

    /// Returns the recorded calls of one operation.
    pub fn calls_for(&self, operation: Operation) -> Vec<ActivityCall> {
        self.read(|s| {
            s.calls
                .iter()
                .filter(|c| c.operation() == operation)
                .cloned()
                .collect()
        })
    }

    /// Returns how many times `operation` was invoked, including failures.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.read(|s| s.calls.iter().filter(|c| c.operation() == operation).count())
    }

    /// Returns the applied payment amounts for an order, refunds negative.
    pub fn payments_for(&self, order_id: OrderId) -> Vec<Money> {
        self.read(|s| {
            s.payments
                .iter()
                .filter(|(id, _)| *id == order_id)
                .map(|(_, amount)| *amount)
                .collect()
        })
    }

    /// Returns the net amount charged for an order.
    pub fn net_charged(&self, order_id: OrderId) -> Money {
        Money::from_cents(self.payments_for(order_id).iter().map(Money::cents).sum())
    }

    /// Returns the last recorded status of an order.
    pub fn record_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.read(|s| s.records.get(&order_id).copied())
    }

    /// Returns how many inventory updates took effect for an order.
    pub fn inventory_update_count(&self, order_id: OrderId) -> usize {
        self.read(|s| {
            s.inventory_updates
                .iter()
                .filter(|(id, _)| *id == order_id)
                .count()
        })
    }

    /// Returns how many notifications took effect for an order.
    pub fn notification_count(&self, order_id: OrderId) -> usize {
        self.read(|s| s.notifications.iter().filter(|id| **id == order_id).count())
    }

    /// Records the call, waits out the latency and applies any injected
    /// failure.
    async fn invoke(&self, call: ActivityCall) -> Result<(), ActivityError> {
        let operation = call.operation();
        let latency = {
            let mut state = self.write();
            if state.retain_history {
                state.calls.push(call);
            }
            state.latency.get(&operation).copied()
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.write();
        match state.failures.get_mut(&operation) {
            Some(FailureMode::Always) => Err(ActivityError::transient(format!(
                "{operation} unavailable"
            ))),
            Some(FailureMode::Permanent) => Err(ActivityError::non_retryable(format!(
                "{operation} rejected"
            ))),
            Some(FailureMode::Times(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(ActivityError::transient(format!(
                    "{operation} temporarily unavailable"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Applies an effect unless its key was already applied.
    fn apply_once(
        &self,
        order_id: OrderId,
        key: &IdempotencyKey,
        effect: impl FnOnce(&mut InMemoryActivitiesState),
    ) {
        let mut state = self.write();
        if state.applied.entry(order_id).or_default().insert(key.clone()) {
            effect(&mut state);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&InMemoryActivitiesState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryActivitiesState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderActivities for InMemoryOrderActivities {
    async fn create_order_record(
        &self,
        ctx: &ActivityContext,
        order_id: OrderId,
        status: OrderStatus,
        _created_at: DateTime<Utc>,
    ) -> Result<(), ActivityError> {
        self.invoke(ActivityCall::CreateOrderRecord {
            order_id,
            status,
            key: ctx.idempotency_key().clone(),
            attempt: ctx.attempt(),
        })
        .await?;

        self.apply_once(order_id, ctx.idempotency_key(), |state| {
            state.records.insert(order_id, status);
        });
        tracing::debug!(%order_id, %status, "order record written");
        Ok(())
    }

    async fn process_payment(
        &self,
        ctx: &ActivityContext,
        order_id: OrderId,
        amount: Money,
    ) -> Result<(), ActivityError> {
        self.invoke(ActivityCall::ProcessPayment {
            order_id,
            amount,
            key: ctx.idempotency_key().clone(),
            attempt: ctx.attempt(),
        })
        .await?;

        self.apply_once(order_id, ctx.idempotency_key(), |state| {
            state.payments.push((order_id, amount));
        });
        tracing::debug!(%order_id, %amount, "payment processed");
        Ok(())
    }

    async fn update_inventory(
        &self,
        ctx: &ActivityContext,
        order_id: OrderId,
        products: &[ProductId],
    ) -> Result<(), ActivityError> {
        self.invoke(ActivityCall::UpdateInventory {
            order_id,
            products: products.to_vec(),
            key: ctx.idempotency_key().clone(),
            attempt: ctx.attempt(),
        })
        .await?;

        self.apply_once(order_id, ctx.idempotency_key(), |state| {
            state.inventory_updates.push((order_id, products.to_vec()));
        });
        tracing::debug!(%order_id, products = products.len(), "inventory updated");
        Ok(())
    }

    async fn notify_customer(
        &self,
        ctx: &ActivityContext,
        order_id: OrderId,
    ) -> Result<(), ActivityError> {
        self.invoke(ActivityCall::NotifyCustomer {
            order_id,
            key: ctx.idempotency_key().clone(),
            attempt: ctx.attempt(),
        })
        .await?;

        self.apply_once(order_id, ctx.idempotency_key(), |state| {
            state.notifications.push(order_id);
        });
        tracing::debug!(%order_id, "customer notified");
        Ok(())
    }

    async fn release(&self, order_id: OrderId) {
        let mut state = self.write();
        if state.retain_history {
            return;
        }
        state.applied.remove(&order_id);
        state.records.remove(&order_id);
        state.payments.retain(|(id, _)| *id != order_id);
        state.inventory_updates.retain(|(id, _)| *id != order_id);
        state.notifications.retain(|id| *id != order_id);
        tracing::debug!(%order_id, "order released");
    }
}
