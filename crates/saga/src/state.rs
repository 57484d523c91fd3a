//! Saga state machine.

use domain::OrderStatus;
use serde::{Deserialize, Serialize};

/// The state of an order saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► PaymentPending ──► InventoryPending ──► AwaitingDecision ──┬──► Completing ──► Completed
///    │              │                    │                               └──► Cancelling ──► Cancelled
///    └──────────────┴────────────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Saga started, the order record is being created.
    #[default]
    Created,

    /// Order recorded, payment is being charged.
    PaymentPending,

    /// Payment charged, inventory is being decremented.
    InventoryPending,

    /// All forward steps done, waiting for a complete or cancel signal.
    AwaitingDecision,

    /// A complete signal arrived, the customer is being notified.
    Completing,

    /// A cancel signal arrived, compensation is running.
    Cancelling,

    /// Order fulfilled (terminal state).
    Completed,

    /// Order cancelled and compensated (terminal state).
    Cancelled,

    /// A forward step failed (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Cancelled | SagaState::Failed
        )
    }

    /// Returns true if a decision signal can be delivered in this state.
    pub fn accepts_signals(&self) -> bool {
        matches!(self, SagaState::AwaitingDecision)
    }

    /// Returns the order status customers see while the saga is in this state.
    pub fn order_status(&self) -> OrderStatus {
        match self {
            SagaState::Created | SagaState::PaymentPending => OrderStatus::Pending,
            SagaState::InventoryPending => OrderStatus::Paid,
            SagaState::AwaitingDecision | SagaState::Completing | SagaState::Cancelling => {
                OrderStatus::AwaitingDecision
            }
            SagaState::Completed => OrderStatus::Completed,
            SagaState::Cancelled => OrderStatus::Cancelled,
            SagaState::Failed => OrderStatus::Failed,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Created => "Created",
            SagaState::PaymentPending => "PaymentPending",
            SagaState::InventoryPending => "InventoryPending",
            SagaState::AwaitingDecision => "AwaitingDecision",
            SagaState::Completing => "Completing",
            SagaState::Cancelling => "Cancelling",
            SagaState::Completed => "Completed",
            SagaState::Cancelled => "Cancelled",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
