//! Compensation engine.
//!
//! Undoes completed forward steps in reverse order, then records the order
//! as cancelled and notifies the customer. Compensation is best-effort:
//! failures are logged and reported, never returned as errors.

use chrono::Utc;
use common::{IdempotencyKey, OrderId};
use domain::{Money, OrderStatus};
use serde::{Deserialize, Serialize};

use crate::activities::OrderActivities;
use crate::executor::{ActivityExecutor, RetryPolicy};
use crate::order_fulfillment::{
    STEP_CANCEL_RECORD, STEP_INVENTORY, STEP_NOTIFY_CANCELLATION, STEP_PAYMENT, STEP_REFUND,
    STEP_RESTOCK,
};

/// Why compensation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationReason {
    PaymentFailed,
    InventoryFailed,
    UserCancelled,
}

impl CompensationReason {
    /// Returns the wire name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationReason::PaymentFailed => "payment_failed",
            CompensationReason::InventoryFailed => "inventory_failed",
            CompensationReason::UserCancelled => "user_cancelled",
        }
    }
}

impl std::fmt::Display for CompensationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one compensation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompensationStepStatus {
    /// The action succeeded.
    Completed,
    /// Nothing to undo for this step.
    Skipped,
    /// The action failed after its retries; compensation went on.
    Failed { error: String },
}

/// Outcome of one compensation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationOutcome {
    /// Name of the compensation action.
    pub step: String,
    /// What happened.
    #[serde(flatten)]
    pub status: CompensationStepStatus,
}

/// Everything a compensation run did, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompensationReport {
    pub outcomes: Vec<CompensationOutcome>,
}

impl CompensationReport {
    /// Returns true if every action completed or was skipped.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Returns the failed actions.
    pub fn failures(&self) -> impl Iterator<Item = &CompensationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CompensationStepStatus::Failed { .. }))
    }

    /// Returns the outcome of a named action.
    pub fn outcome(&self, step: &str) -> Option<&CompensationStepStatus> {
        self.outcomes
            .iter()
            .find(|o| o.step == step)
            .map(|o| &o.status)
    }

    fn push(&mut self, step: &str, status: CompensationStepStatus) {
        self.outcomes.push(CompensationOutcome {
            step: step.to_string(),
            status,
        });
    }
}

/// Runs inverse actions through the activity executor.
pub struct CompensationEngine<'a, A: ?Sized> {
    activities: &'a A,
    executor: &'a ActivityExecutor,
    policy: &'a RetryPolicy,
}

impl<'a, A> CompensationEngine<'a, A>
where
    A: OrderActivities + ?Sized,
{
    /// Creates an engine over the given activities.
    pub fn new(activities: &'a A, executor: &'a ActivityExecutor, policy: &'a RetryPolicy) -> Self {
        Self {
            activities,
            executor,
            policy,
        }
    }

    /// Compensates `completed_steps` in reverse order, then cancels the order
    /// record and notifies the customer.
    ///
    /// `amount` is the original charge; the refund is its negation.
    #[tracing::instrument(skip(self, completed_steps), fields(steps = ?completed_steps))]
    pub async fn compensate(
        &self,
        order_id: OrderId,
        amount: Money,
        reason: CompensationReason,
        completed_steps: &[String],
    ) -> CompensationReport {
        tracing::info!(%order_id, %reason, "compensation started");
        let mut report = CompensationReport::default();

        for step in completed_steps.iter().rev() {
            match step.as_str() {
                STEP_PAYMENT => {
                    let refund = amount.negate();
                    let status = self
                        .run(order_id, STEP_REFUND, |ctx| async move {
                            self.activities
                                .process_payment(&ctx, order_id, refund)
                                .await
                        })
                        .await;
                    report.push(STEP_REFUND, status);
                }
                STEP_INVENTORY => {
                    // Decremented stock is not given back.
                    tracing::debug!(%order_id, "no inverse action for inventory");
                    report.push(STEP_RESTOCK, CompensationStepStatus::Skipped);
                }
                other => {
                    tracing::debug!(%order_id, step = other, "step has no inverse action");
                }
            }
        }

        let status = self
            .run(order_id, STEP_CANCEL_RECORD, |ctx| async move {
                self.activities
                    .create_order_record(&ctx, order_id, OrderStatus::Cancelled, Utc::now())
                    .await
            })
            .await;
        report.push(STEP_CANCEL_RECORD, status);

        let status = self
            .run(order_id, STEP_NOTIFY_CANCELLATION, |ctx| async move {
                self.activities.notify_customer(&ctx, order_id).await
            })
            .await;
        report.push(STEP_NOTIFY_CANCELLATION, status);

        if report.is_clean() {
            tracing::info!(%order_id, %reason, "compensation finished");
        } else {
            tracing::warn!(
                %order_id,
                %reason,
                failed = report.failures().count(),
                "compensation finished with failures"
            );
        }
        report
    }

    async fn run<F, Fut>(&self, order_id: OrderId, step: &str, op: F) -> CompensationStepStatus
    where
        F: FnMut(crate::activities::ActivityContext) -> Fut,
        Fut: std::future::Future<Output = Result<(), crate::error::ActivityError>>,
    {
        let key = IdempotencyKey::new(order_id, step, 1);
        match self.executor.execute(step, &key, self.policy, op).await {
            Ok(_) => CompensationStepStatus::Completed,
            Err(failure) => {
                metrics::counter!("compensation_failures_total", "step" => step.to_string())
                    .increment(1);
                tracing::warn!(%order_id, step, error = %failure, "compensation step failed");
                CompensationStepStatus::Failed {
                    error: failure.error.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::{ActivityCall, FailureMode, InMemoryOrderActivities, Operation};

    fn steps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn compensate(
        activities: &InMemoryOrderActivities,
        order_id: OrderId,
        reason: CompensationReason,
        completed: &[&str],
    ) -> CompensationReport {
        let executor = ActivityExecutor::new();
        let policy = RetryPolicy::default();
        CompensationEngine::new(activities, &executor, &policy)
            .compensate(order_id, Money::from_cents(10_000), reason, &steps(completed))
            .await
    }

    #[tokio::test]
    async fn test_no_completed_steps_only_cancels_and_notifies() {
        let activities = InMemoryOrderActivities::new();
        let order_id = OrderId::new();

        let report = compensate(&activities, order_id, CompensationReason::PaymentFailed, &[]).await;

        assert!(report.is_clean());
        assert_eq!(activities.call_count(Operation::ProcessPayment), 0);
        assert_eq!(activities.record_status(order_id), Some(OrderStatus::Cancelled));
        assert_eq!(activities.notification_count(order_id), 1);
        assert_eq!(
            report.outcomes.iter().map(|o| o.step.as_str()).collect::<Vec<_>>(),
            vec![STEP_CANCEL_RECORD, STEP_NOTIFY_CANCELLATION]
        );
    }

    #[tokio::test]
    async fn test_refund_negates_amount() {
        let activities = InMemoryOrderActivities::new();
        let order_id = OrderId::new();

        let report = compensate(
            &activities,
            order_id,
            CompensationReason::UserCancelled,
            &[STEP_PAYMENT, STEP_INVENTORY],
        )
        .await;

        assert_eq!(activities.payments_for(order_id), vec![Money::from_cents(-10_000)]);
        assert_eq!(report.outcome(STEP_RESTOCK), Some(&CompensationStepStatus::Skipped));
        assert_eq!(report.outcome(STEP_REFUND), Some(&CompensationStepStatus::Completed));
        // Reverse order: inventory is undone before payment.
        assert_eq!(
            report.outcomes.iter().map(|o| o.step.as_str()).collect::<Vec<_>>(),
            vec![STEP_RESTOCK, STEP_REFUND, STEP_CANCEL_RECORD, STEP_NOTIFY_CANCELLATION]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refund_does_not_stop_compensation() {
        let activities = InMemoryOrderActivities::new();
        activities.set_failure(Operation::ProcessPayment, FailureMode::Always);
        let order_id = OrderId::new();

        let report = compensate(
            &activities,
            order_id,
            CompensationReason::InventoryFailed,
            &[STEP_PAYMENT],
        )
        .await;

        assert!(!report.is_clean());
        assert!(matches!(
            report.outcome(STEP_REFUND),
            Some(CompensationStepStatus::Failed { .. })
        ));
        assert_eq!(activities.call_count(Operation::ProcessPayment), 3);
        assert_eq!(activities.record_status(order_id), Some(OrderStatus::Cancelled));
        assert_eq!(activities.notification_count(order_id), 1);
    }

    #[tokio::test]
    async fn test_keys_are_stable_across_runs() {
        let activities = InMemoryOrderActivities::new();
        let order_id = OrderId::new();

        for _ in 0..2 {
            compensate(&activities, order_id, CompensationReason::UserCancelled, &[STEP_PAYMENT])
                .await;
        }

        let refunds = activities.calls_for(Operation::ProcessPayment);
        assert_eq!(refunds.len(), 2);
        assert_eq!(refunds[0].key(), refunds[1].key());
        assert!(matches!(
            &refunds[0],
            ActivityCall::ProcessPayment { amount, .. } if *amount == Money::from_cents(-10_000)
        ));
        // Second run is deduplicated by the backend.
        assert_eq!(activities.net_charged(order_id), Money::from_cents(-10_000));
    }

    #[test]
    fn test_report_serialization() {
        let mut report = CompensationReport::default();
        report.push(STEP_REFUND, CompensationStepStatus::Failed {
            error: "declined".to_string(),
        });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["step"], "refund");
        assert_eq!(json["outcomes"][0]["status"], "failed");
        assert_eq!(json["outcomes"][0]["error"], "declined");

        let back: CompensationReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
