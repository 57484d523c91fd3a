//! Order saga step names.
//!
//! Step names appear in checkpoint records and idempotency keys, so they
//! must never change once sagas have been persisted.

/// The aggregate type name of the order saga.
pub const SAGA_TYPE: &str = "OrderSaga";

/// Forward step: record the order with the backend.
pub const STEP_CREATE: &str = "create";

/// Forward step: charge the order amount.
pub const STEP_PAYMENT: &str = "payment";

/// Forward step: decrement inventory for the ordered products.
pub const STEP_INVENTORY: &str = "inventory";

/// Notification sent after a `complete` decision.
pub const STEP_NOTIFY: &str = "notify";

/// Compensation: refund the charged amount.
pub const STEP_REFUND: &str = "refund";

/// Compensation: give back decremented inventory.
pub const STEP_RESTOCK: &str = "restock";

/// Compensation: record the order as cancelled.
pub const STEP_CANCEL_RECORD: &str = "cancel_record";

/// Compensation: tell the customer about the cancellation.
pub const STEP_NOTIFY_CANCELLATION: &str = "notify_cancellation";

/// Returns true for forward steps that have an inverse action.
pub fn is_compensable(step: &str) -> bool {
    matches!(step, STEP_PAYMENT | STEP_INVENTORY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_payment_and_inventory_are_compensable() {
        assert!(!is_compensable(STEP_CREATE));
        assert!(is_compensable(STEP_PAYMENT));
        assert!(is_compensable(STEP_INVENTORY));
        assert!(!is_compensable(STEP_NOTIFY));
    }
}
