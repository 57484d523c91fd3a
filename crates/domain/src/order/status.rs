//! Order status lifecycle.

use serde::{Deserialize, Serialize};

/// The status of an order as seen by customers and the request API.
///
/// Status transitions, all driven by the saga:
/// ```text
/// Pending ──► Paid ──► AwaitingDecision ──┬──► Completed
///    │          │              │            └──► Cancelled
///    │          │              └──► InventoryReserved (no decision in time)
///    └──────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order accepted, payment not yet confirmed.
    #[default]
    Pending,

    /// Payment charged.
    Paid,

    /// Inventory decremented, waiting for an external complete or cancel
    /// decision.
    AwaitingDecision,

    /// Inventory decremented and charged, but the decision window passed.
    /// The order holds its reservation until an operator intervenes.
    InventoryReserved,

    /// Order fulfilled (terminal state).
    Completed,

    /// Order cancelled by the customer and compensated (terminal state).
    Cancelled,

    /// A step failed and compensation ran (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::AwaitingDecision => "awaiting_decision",
            OrderStatus::InventoryReserved => "inventory_reserved",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
