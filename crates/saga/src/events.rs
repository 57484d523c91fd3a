//! Saga transition events.
//!
//! Every event is checkpointed before the saga acts on it, so replaying the
//! stored events rebuilds the exact state the saga had when it stopped.

use chrono::{DateTime, Utc};
use domain::{DomainEvent, Order};
use serde::{Deserialize, Serialize};

use crate::compensation::{CompensationReason, CompensationReport};
use crate::executor::Attempts;
use crate::multiplexer::SignalKind;

/// Events that can occur during saga execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started for an order.
    SagaStarted(SagaStartedData),

    /// A step is about to invoke its activity.
    StepStarted(StepStartedData),

    /// A step's activity succeeded.
    StepCompleted(StepCompletedData),

    /// A step's activity failed after all retries.
    StepFailed(StepFailedData),

    /// Compensation is about to run.
    CompensationStarted(CompensationStartedData),

    /// Compensation finished; carries the per-action outcomes.
    CompensationCompleted(CompensationReport),

    /// A decision signal was taken from the mailbox.
    SignalReceived(SignalReceivedData),

    /// The decision window closed without a signal. The saga stays stalled.
    DecisionTimedOut(DecisionTimedOutData),

    /// Saga completed successfully.
    SagaCompleted(SagaFinishedData),

    /// Saga cancelled by a signal after compensation.
    SagaCancelled(SagaFinishedData),

    /// Saga failed at a forward step.
    SagaFailed(SagaFailedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationCompleted(_) => "CompensationCompleted",
            SagaEvent::SignalReceived(_) => "SignalReceived",
            SagaEvent::DecisionTimedOut(_) => "DecisionTimedOut",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaCancelled(_) => "SagaCancelled",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStartedData {
    /// The order being processed.
    pub order: Order,
    /// When the saga started.
    pub started_at: DateTime<Utc>,
    /// Latest time a decision signal is waited for.
    pub decision_deadline: DateTime<Utc>,
}

/// Data for StepStarted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStartedData {
    /// The step name.
    pub step: String,
    /// Execution epoch of the step, part of its idempotency key.
    pub epoch: u32,
}

/// Data for StepCompleted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCompletedData {
    /// The step name.
    pub step: String,
    /// Attempts the activity took.
    pub attempts: Attempts,
}

/// Data for StepFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailedData {
    /// The step that failed.
    pub step: String,
    /// Error of the last attempt.
    pub error: String,
    /// Attempts made.
    pub attempts: Attempts,
}

/// Data for CompensationStarted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationStartedData {
    /// Why compensation runs.
    pub reason: CompensationReason,
    /// Completed steps handed to the compensation engine.
    pub steps: Vec<String>,
}

/// Data for SignalReceived event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalReceivedData {
    /// The decision.
    pub kind: SignalKind,
    /// When the signal arrived.
    pub arrived_at: DateTime<Utc>,
}

/// Data for DecisionTimedOut event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTimedOutData {
    /// When the timeout fired.
    pub timed_out_at: DateTime<Utc>,
}

/// Data for SagaCompleted and SagaCancelled events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaFinishedData {
    /// When the saga finished.
    pub finished_at: DateTime<Utc>,
}

/// Data for SagaFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaFailedData {
    /// The step that failed.
    pub step: String,
    /// Message reported to the caller.
    pub reason: String,
    /// When the saga failed.
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    /// Creates a SagaStarted event.
    pub fn saga_started(
        order: Order,
        started_at: DateTime<Utc>,
        decision_deadline: DateTime<Utc>,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            order,
            started_at,
            decision_deadline,
        })
    }

    /// Creates a StepStarted event.
    pub fn step_started(step: impl Into<String>, epoch: u32) -> Self {
        SagaEvent::StepStarted(StepStartedData {
            step: step.into(),
            epoch,
        })
    }

    /// Creates a StepCompleted event.
    pub fn step_completed(step: impl Into<String>, attempts: Attempts) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step: step.into(),
            attempts,
        })
    }

    /// Creates a StepFailed event.
    pub fn step_failed(step: impl Into<String>, error: impl Into<String>, attempts: Attempts) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step: step.into(),
            error: error.into(),
            attempts,
        })
    }

    /// Creates a CompensationStarted event.
    pub fn compensation_started(reason: CompensationReason, steps: Vec<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationStartedData { reason, steps })
    }

    /// Creates a CompensationCompleted event.
    pub fn compensation_completed(report: CompensationReport) -> Self {
        SagaEvent::CompensationCompleted(report)
    }

    /// Creates a SignalReceived event.
    pub fn signal_received(kind: SignalKind, arrived_at: DateTime<Utc>) -> Self {
        SagaEvent::SignalReceived(SignalReceivedData { kind, arrived_at })
    }

    /// Creates a DecisionTimedOut event.
    pub fn decision_timed_out() -> Self {
        SagaEvent::DecisionTimedOut(DecisionTimedOutData {
            timed_out_at: Utc::now(),
        })
    }

    /// Creates a SagaCompleted event.
    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaFinishedData {
            finished_at: Utc::now(),
        })
    }

    /// Creates a SagaCancelled event.
    pub fn saga_cancelled() -> Self {
        SagaEvent::SagaCancelled(SagaFinishedData {
            finished_at: Utc::now(),
        })
    }

    /// Creates a SagaFailed event.
    pub fn saga_failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            step: step.into(),
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;

    #[test]
    fn test_event_type_names() {
        assert_eq!(SagaEvent::step_started("payment", 1).event_type(), "StepStarted");
        assert_eq!(SagaEvent::step_completed("payment", 1).event_type(), "StepCompleted");
        assert_eq!(SagaEvent::decision_timed_out().event_type(), "DecisionTimedOut");
        assert_eq!(SagaEvent::saga_cancelled().event_type(), "SagaCancelled");
        assert_eq!(
            SagaEvent::compensation_completed(CompensationReport::default()).event_type(),
            "CompensationCompleted"
        );
    }

    #[test]
    fn test_tagged_json_shape() {
        let event = SagaEvent::step_started("payment", 2);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StepStarted");
        assert_eq!(json["data"]["step"], "payment");
        assert_eq!(json["data"]["epoch"], 2);

        let event = SagaEvent::compensation_started(
            CompensationReason::InventoryFailed,
            vec!["payment".to_string()],
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["reason"], "inventory_failed");
        assert_eq!(json["data"]["steps"], serde_json::json!(["payment"]));
    }

    #[test]
    fn test_saga_started_carries_order() {
        let order = Order::new(Money::from_cents(100), vec!["p1".into()]).unwrap();
        let now = Utc::now();
        let event = SagaEvent::saga_started(order.clone(), now, now);

        let json = serde_json::to_string(&event).unwrap();
        let back: SagaEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert!(matches!(back, SagaEvent::SagaStarted(data) if data.order == order));
    }
}
