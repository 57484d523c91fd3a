//! Saga instance aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use checkpoint_store::{Archive, CheckpointRecord, Sequence};
use common::OrderId;
use domain::{Aggregate, Order, OrderStatus};
use serde::{Deserialize, Serialize};

use crate::compensation::{CompensationReason, CompensationReport};
use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::executor::Attempts;
use crate::multiplexer::SignalKind;
use crate::order_fulfillment::{self, STEP_NOTIFY};
use crate::state::SagaState;

/// A step whose start was checkpointed but whose result was not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightStep {
    pub step: String,
    pub epoch: u32,
}

/// A forward step failure that has not been compensated yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: String,
    pub error: String,
}

/// Compensation as recorded in the checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub reason: CompensationReason,
    pub steps: Vec<String>,
    /// Set once the compensation engine finished.
    pub report: Option<CompensationReport>,
}

/// A checkpoint-replayed order saga.
///
/// Holds everything needed to resume the saga: the state, confirmed steps,
/// the step in flight (if any), recorded failures, compensation and the
/// decision deadline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    id: Option<OrderId>,
    sequence: Sequence,
    state: SagaState,
    order: Option<Order>,
    started_at: Option<DateTime<Utc>>,
    decision_deadline: Option<DateTime<Utc>>,
    completed_steps: Vec<String>,
    attempts: BTreeMap<String, Attempts>,
    epochs: BTreeMap<String, u32>,
    in_flight: Option<InFlightStep>,
    pending_failure: Option<StepFailure>,
    compensation: Option<CompensationRecord>,
    decision: Option<SignalKind>,
    stalled: bool,
    /// Result of the notification after a complete decision.
    customer_notified: Option<bool>,
    failed_step: Option<String>,
    failure_reason: Option<String>,
}

impl Aggregate for SagaInstance {
    type Event = SagaEvent;
    type Error = SagaError;

    fn aggregate_type() -> &'static str {
        order_fulfillment::SAGA_TYPE
    }

    fn id(&self) -> Option<OrderId> {
        self.id
    }

    fn sequence(&self) -> Sequence {
        self.sequence
    }

    fn set_sequence(&mut self, sequence: Sequence) {
        self.sequence = sequence;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.order.id());
                self.order = Some(data.order);
                self.started_at = Some(data.started_at);
                self.decision_deadline = Some(data.decision_deadline);
                self.state = SagaState::Created;
            }
            SagaEvent::StepStarted(data) => {
                self.epochs.insert(data.step.clone(), data.epoch);
                self.in_flight = Some(InFlightStep {
                    step: data.step,
                    epoch: data.epoch,
                });
            }
            SagaEvent::StepCompleted(data) => {
                self.in_flight = None;
                self.attempts.insert(data.step.clone(), data.attempts);
                match data.step.as_str() {
                    order_fulfillment::STEP_CREATE => self.state = SagaState::PaymentPending,
                    order_fulfillment::STEP_PAYMENT => self.state = SagaState::InventoryPending,
                    order_fulfillment::STEP_INVENTORY => self.state = SagaState::AwaitingDecision,
                    STEP_NOTIFY => self.customer_notified = Some(true),
                    _ => {}
                }
                if data.step != STEP_NOTIFY {
                    self.completed_steps.push(data.step);
                }
            }
            SagaEvent::StepFailed(data) => {
                self.in_flight = None;
                self.attempts.insert(data.step.clone(), data.attempts);
                if data.step == STEP_NOTIFY {
                    self.customer_notified = Some(false);
                } else {
                    self.pending_failure = Some(StepFailure {
                        step: data.step,
                        error: data.error,
                    });
                }
            }
            SagaEvent::CompensationStarted(data) => {
                self.compensation = Some(CompensationRecord {
                    reason: data.reason,
                    steps: data.steps,
                    report: None,
                });
            }
            SagaEvent::CompensationCompleted(report) => {
                if let Some(compensation) = self.compensation.as_mut() {
                    compensation.report = Some(report);
                }
            }
            SagaEvent::SignalReceived(data) => {
                self.decision = Some(data.kind);
                self.state = match data.kind {
                    SignalKind::Complete => SagaState::Completing,
                    SignalKind::Cancel => SagaState::Cancelling,
                };
            }
            SagaEvent::DecisionTimedOut(_) => {
                self.stalled = true;
            }
            SagaEvent::SagaCompleted(_) => {
                self.state = SagaState::Completed;
            }
            SagaEvent::SagaCancelled(_) => {
                self.state = SagaState::Cancelled;
            }
            SagaEvent::SagaFailed(data) => {
                self.state = SagaState::Failed;
                self.pending_failure = None;
                self.failed_step = Some(data.step);
                self.failure_reason = Some(data.reason);
            }
        }

        let status = if self.stalled {
            OrderStatus::InventoryReserved
        } else {
            self.state.order_status()
        };
        if let Some(order) = self.order.as_mut() {
            order.set_status(status);
        }
    }
}

impl SagaInstance {
    /// Rebuilds a saga from its archive and checkpoint records.
    ///
    /// Records must continue the archive's (or an empty) history without
    /// gaps, and each record's state label must match the state reached by
    /// applying it. Returns `None` when there is no history at all.
    pub fn replay(
        saga_id: OrderId,
        archive: Option<Archive>,
        records: Vec<CheckpointRecord>,
    ) -> Result<Option<Self>, SagaError> {
        let mut saga = match archive {
            Some(archive) => archive.into_state::<SagaInstance>()?,
            None if records.is_empty() => return Ok(None),
            None => SagaInstance::default(),
        };

        for record in records {
            let expected = saga.sequence.next();
            if record.sequence != expected {
                return Err(SagaError::CorruptCheckpoint {
                    saga_id,
                    reason: format!(
                        "expected sequence {expected}, found {}",
                        record.sequence
                    ),
                });
            }

            let event: SagaEvent = record.event()?;
            saga.apply(event);

            if saga.state.as_str() != record.state {
                return Err(SagaError::CorruptCheckpoint {
                    saga_id,
                    reason: format!(
                        "record {} is labelled {} but replays to {}",
                        record.sequence, record.state, saga.state
                    ),
                });
            }
            saga.set_sequence(record.sequence);
        }

        if saga.id != Some(saga_id) {
            return Err(SagaError::CorruptCheckpoint {
                saga_id,
                reason: "history belongs to another saga".to_string(),
            });
        }
        Ok(Some(saga))
    }
}

// Query methods
impl SagaInstance {
    /// Returns the saga state.
    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns the order with its projected status.
    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    /// Returns when the saga started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns the latest time a decision is waited for.
    pub fn decision_deadline(&self) -> Option<DateTime<Utc>> {
        self.decision_deadline
    }

    /// Returns the confirmed forward steps in completion order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// Returns the confirmed forward steps that have an inverse action.
    pub fn compensable_steps(&self) -> Vec<String> {
        self.completed_steps
            .iter()
            .filter(|step| order_fulfillment::is_compensable(step))
            .cloned()
            .collect()
    }

    /// Returns how many attempts a finished step took.
    pub fn attempts(&self, step: &str) -> Option<Attempts> {
        self.attempts.get(step).copied()
    }

    /// Returns the epoch the next start of `step` must use.
    pub fn next_epoch(&self, step: &str) -> u32 {
        self.epochs.get(step).map_or(1, |epoch| epoch + 1)
    }

    /// Returns the step started but not yet confirmed, if any.
    pub fn in_flight(&self) -> Option<&InFlightStep> {
        self.in_flight.as_ref()
    }

    /// Returns the forward step failure awaiting compensation, if any.
    pub fn pending_failure(&self) -> Option<&StepFailure> {
        self.pending_failure.as_ref()
    }

    /// Returns the recorded compensation, if any.
    pub fn compensation(&self) -> Option<&CompensationRecord> {
        self.compensation.as_ref()
    }

    /// Returns the decision taken, if any.
    pub fn decision(&self) -> Option<SignalKind> {
        self.decision
    }

    /// Returns true if the decision window closed without a signal.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Returns the outcome of the completion notification, if sent.
    pub fn customer_notified(&self) -> Option<bool> {
        self.customer_notified
    }

    /// Returns the forward step the saga failed at, if any.
    pub fn failed_step(&self) -> Option<&str> {
        self.failed_step.as_deref()
    }

    /// Returns the failure reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compensation::{CompensationOutcome, CompensationStepStatus};
    use crate::order_fulfillment::{STEP_CREATE, STEP_INVENTORY, STEP_PAYMENT};
    use domain::{DomainEvent, Money, OrderStatus};

    fn make_order() -> Order {
        Order::new(Money::from_cents(10_000), vec!["p1".into()]).unwrap()
    }

    fn started(order: &Order) -> SagaEvent {
        let now = Utc::now();
        SagaEvent::saga_started(order.clone(), now, now + chrono::Duration::hours(24))
    }

    fn happy_path(order: &Order) -> Vec<SagaEvent> {
        vec![
            started(order),
            SagaEvent::step_started(STEP_CREATE, 1),
            SagaEvent::step_completed(STEP_CREATE, 1),
            SagaEvent::step_started(STEP_PAYMENT, 1),
            SagaEvent::step_completed(STEP_PAYMENT, 2),
            SagaEvent::step_started(STEP_INVENTORY, 1),
            SagaEvent::step_completed(STEP_INVENTORY, 1),
        ]
    }

    /// Builds records the way the orchestrator writes them.
    fn to_records(order_id: OrderId, events: Vec<SagaEvent>) -> Vec<CheckpointRecord> {
        let mut saga = SagaInstance::default();
        events
            .into_iter()
            .enumerate()
            .map(|(i, event)| {
                saga.apply(event.clone());
                CheckpointRecord::from_event(
                    order_id,
                    Sequence::new(i as i64 + 1),
                    saga.state().as_str(),
                    event.event_type(),
                    &event,
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_default_saga_instance() {
        let saga = SagaInstance::default();
        assert!(saga.id().is_none());
        assert_eq!(saga.state(), SagaState::Created);
        assert!(saga.completed_steps().is_empty());
        assert_eq!(saga.next_epoch(STEP_PAYMENT), 1);
    }

    #[test]
    fn test_forward_steps_advance_state_and_status() {
        let order = make_order();
        let mut saga = SagaInstance::default();
        let events = happy_path(&order);

        saga.apply_events(events[..3].to_vec());
        assert_eq!(saga.state(), SagaState::PaymentPending);
        assert_eq!(saga.order().unwrap().status(), OrderStatus::Pending);

        saga.apply_events(events[3..5].to_vec());
        assert_eq!(saga.state(), SagaState::InventoryPending);
        assert_eq!(saga.order().unwrap().status(), OrderStatus::Paid);
        assert_eq!(saga.attempts(STEP_PAYMENT), Some(2));

        saga.apply_events(events[5..].to_vec());
        assert_eq!(saga.state(), SagaState::AwaitingDecision);
        assert_eq!(saga.order().unwrap().status(), OrderStatus::AwaitingDecision);
        assert_eq!(saga.completed_steps(), &[STEP_CREATE, STEP_PAYMENT, STEP_INVENTORY]);
        assert_eq!(saga.compensable_steps(), vec![STEP_PAYMENT, STEP_INVENTORY]);
        assert!(saga.in_flight().is_none());
    }

    #[test]
    fn test_step_started_marks_in_flight() {
        let order = make_order();
        let mut saga = SagaInstance::default();
        saga.apply(started(&order));
        saga.apply(SagaEvent::step_started(STEP_CREATE, 1));

        assert_eq!(
            saga.in_flight(),
            Some(&InFlightStep {
                step: STEP_CREATE.to_string(),
                epoch: 1
            })
        );
        assert_eq!(saga.next_epoch(STEP_CREATE), 2);
        assert_eq!(saga.state(), SagaState::Created);
    }

    #[test]
    fn test_step_failure_then_compensation_then_failed() {
        let order = make_order();
        let mut saga = SagaInstance::default();
        saga.apply_events(happy_path(&order)[..4].to_vec());
        saga.apply(SagaEvent::step_failed(STEP_PAYMENT, "declined", 3));

        assert_eq!(
            saga.pending_failure(),
            Some(&StepFailure {
                step: STEP_PAYMENT.to_string(),
                error: "declined".to_string()
            })
        );
        assert_eq!(saga.state(), SagaState::PaymentPending);

        saga.apply(SagaEvent::compensation_started(
            CompensationReason::PaymentFailed,
            vec![],
        ));
        saga.apply(SagaEvent::compensation_completed(CompensationReport {
            outcomes: vec![CompensationOutcome {
                step: "cancel_record".to_string(),
                status: CompensationStepStatus::Completed,
            }],
        }));
        saga.apply(SagaEvent::saga_failed(STEP_PAYMENT, "payment processing failed: declined"));

        assert_eq!(saga.state(), SagaState::Failed);
        assert!(saga.pending_failure().is_none());
        assert_eq!(saga.failed_step(), Some(STEP_PAYMENT));
        assert!(saga.compensation().unwrap().report.is_some());
        assert_eq!(saga.order().unwrap().status(), OrderStatus::Failed);
        assert_eq!(
            saga.failure_reason(),
            Some("payment processing failed: declined")
        );
    }

    #[test]
    fn test_notify_failure_is_not_a_step_failure() {
        let order = make_order();
        let mut saga = SagaInstance::default();
        saga.apply_events(happy_path(&order));
        saga.apply(SagaEvent::signal_received(SignalKind::Complete, Utc::now()));
        saga.apply(SagaEvent::step_started(STEP_NOTIFY, 1));
        saga.apply(SagaEvent::step_failed(STEP_NOTIFY, "smtp down", 3));

        assert_eq!(saga.state(), SagaState::Completing);
        assert!(saga.pending_failure().is_none());
        assert_eq!(saga.customer_notified(), Some(false));
        assert!(!saga.completed_steps().contains(&STEP_NOTIFY.to_string()));
    }

    #[test]
    fn test_timeout_stalls_in_awaiting_decision() {
        let order = make_order();
        let mut saga = SagaInstance::default();
        saga.apply_events(happy_path(&order));
        saga.apply(SagaEvent::decision_timed_out());

        assert!(saga.is_stalled());
        assert_eq!(saga.state(), SagaState::AwaitingDecision);
        assert!(!saga.state().is_terminal());
        assert_eq!(
            saga.order().unwrap().status(),
            OrderStatus::InventoryReserved
        );
    }

    #[test]
    fn test_replay_is_idempotent() {
        let order = make_order();
        let records = to_records(order.id(), happy_path(&order));

        let first = SagaInstance::replay(order.id(), None, records.clone())
            .unwrap()
            .unwrap();
        for _ in 0..5 {
            let again = SagaInstance::replay(order.id(), None, records.clone())
                .unwrap()
                .unwrap();
            assert_eq!(again, first);
        }
        assert_eq!(first.sequence(), Sequence::new(7));
        assert_eq!(first.state(), SagaState::AwaitingDecision);
    }

    #[test]
    fn test_replay_from_archive() {
        let order = make_order();
        let mut events = happy_path(&order);
        events.push(SagaEvent::signal_received(SignalKind::Complete, Utc::now()));
        events.push(SagaEvent::saga_completed());
        let records = to_records(order.id(), events);

        let saga = SagaInstance::replay(order.id(), None, records).unwrap().unwrap();
        let archive =
            Archive::from_state(order.id(), saga.sequence(), saga.state().as_str(), &saga).unwrap();

        let restored = SagaInstance::replay(order.id(), Some(archive), vec![])
            .unwrap()
            .unwrap();
        assert_eq!(restored, saga);
        assert_eq!(restored.state(), SagaState::Completed);
    }

    #[test]
    fn test_replay_empty_history() {
        let result = SagaInstance::replay(OrderId::new(), None, vec![]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_replay_rejects_gap() {
        let order = make_order();
        let mut records = to_records(order.id(), happy_path(&order));
        records.remove(2);

        let result = SagaInstance::replay(order.id(), None, records);
        assert!(matches!(result, Err(SagaError::CorruptCheckpoint { .. })));
    }

    #[test]
    fn test_replay_rejects_mismatched_state_label() {
        let order = make_order();
        let mut records = to_records(order.id(), happy_path(&order));
        records[2].state = "Completed".to_string();

        let result = SagaInstance::replay(order.id(), None, records);
        assert!(matches!(
            result,
            Err(SagaError::CorruptCheckpoint { reason, .. }) if reason.contains("labelled Completed")
        ));
    }

    #[test]
    fn test_replay_rejects_foreign_history() {
        let order = make_order();
        let records = to_records(order.id(), happy_path(&order));

        let result = SagaInstance::replay(OrderId::new(), None, records);
        assert!(matches!(result, Err(SagaError::CorruptCheckpoint { .. })));
    }
}
