//! Saga orchestrator for the durable order saga.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use checkpoint_store::{Archive, CheckpointRecord, CheckpointStore, CheckpointStoreExt};
use common::{IdempotencyKey, OrderId};
use domain::{Aggregate, DomainEvent, Order, OrderStatus};
use tokio::task::JoinHandle;

use crate::activities::{ActivityContext, OrderActivities};
use crate::aggregate::{SagaInstance, StepFailure};
use crate::compensation::{CompensationEngine, CompensationReason};
use crate::error::{ActivityError, Result, SagaError, SignalError};
use crate::events::SagaEvent;
use crate::executor::{ActivityExecutor, RetryPolicy};
use crate::multiplexer::{
    Admission, Delivery, EventMultiplexer, Mailbox, Signal, SignalKind, Wakeup,
};
use crate::order_fulfillment::{STEP_CREATE, STEP_INVENTORY, STEP_NOTIFY, STEP_PAYMENT};
use crate::registry::{SagaLease, SagaRegistry};
use crate::state::SagaState;

/// Tunables of the order saga.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaConfig {
    /// How long a saga waits for a complete or cancel signal.
    pub decision_timeout: Duration,
    /// Retry policy for forward steps and compensations.
    pub retry_policy: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            decision_timeout: Duration::from_secs(24 * 60 * 60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// How an execution of a saga ended, other than by a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    /// Completed after a complete signal.
    Completed,
    /// Cancelled and compensated after a cancel signal.
    Cancelled,
    /// No decision arrived in time. The saga stays in `AwaitingDecision`
    /// and is not resumed by recovery.
    Stalled,
    /// The wait was interrupted by shutdown. The saga resumes on recovery.
    Interrupted,
}

/// Handle to a saga running in the background.
#[derive(Debug)]
pub struct SagaHandle {
    order_id: OrderId,
    task: JoinHandle<Result<SagaOutcome>>,
}

impl SagaHandle {
    /// Returns the order the saga runs for.
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Waits for the execution to end.
    pub async fn outcome(self) -> Result<SagaOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SagaError::Aborted {
                order_id: self.order_id,
                reason: e.to_string(),
            }),
        }
    }
}

struct Shared<S, A> {
    store: S,
    activities: A,
    executor: ActivityExecutor,
    multiplexer: EventMultiplexer,
    registry: SagaRegistry,
    config: SagaConfig,
}

/// Drives order sagas and recovers them after restarts.
///
/// Every transition is appended to the checkpoint store before the saga
/// acts on it: `StepStarted` before an activity runs, `StepCompleted` or
/// `StepFailed` before the next step. A restarted process replays the
/// records and continues after the last confirmed transition.
pub struct SagaOrchestrator<S, A> {
    inner: Arc<Shared<S, A>>,
}

impl<S, A> Clone for SagaOrchestrator<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A> SagaOrchestrator<S, A>
where
    S: CheckpointStore + 'static,
    A: OrderActivities + 'static,
{
    /// Creates an orchestrator with the default configuration.
    pub fn new(store: S, activities: A) -> Self {
        Self::with_config(store, activities, SagaConfig::default())
    }

    /// Creates an orchestrator with a custom configuration.
    pub fn with_config(store: S, activities: A, config: SagaConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                store,
                activities,
                executor: ActivityExecutor::new(),
                multiplexer: EventMultiplexer::new(),
                registry: SagaRegistry::new(),
                config,
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SagaConfig {
        &self.inner.config
    }

    /// Returns the checkpoint store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Returns the registry of sagas running in this process.
    pub fn registry(&self) -> &SagaRegistry {
        &self.inner.registry
    }

    /// Starts a saga for `order` and drives it in a background task.
    ///
    /// Returns once `SagaStarted` is checkpointed, so the saga is visible to
    /// [`get_saga`](Self::get_saga).
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    pub async fn start(&self, order: Order) -> Result<SagaHandle> {
        let (saga, lease) = self.begin(order).await?;
        Ok(self.spawn(saga, lease))
    }

    /// Starts a saga for `order` and drives it to the end of this execution.
    ///
    /// A forward step failure ends the saga in `Failed` and is returned as
    /// [`SagaError::StepFailed`].
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    pub async fn run(&self, order: Order) -> Result<SagaOutcome> {
        let (saga, lease) = self.begin(order).await?;
        self.drive(saga, lease).await
    }

    /// Delivers a decision signal to a saga awaiting its decision.
    ///
    /// Returns [`Delivery::Accepted`] only after the saga has checkpointed
    /// the signal. The first signal wins; a second signal delivered before
    /// the saga consumed the first is dropped and reported as
    /// [`Delivery::Dropped`]. Signals sent before the forward steps finished
    /// are rejected with [`SignalError::NotAwaitingDecision`].
    #[tracing::instrument(skip(self))]
    pub async fn signal(&self, order_id: OrderId, kind: SignalKind) -> Result<Delivery> {
        if let Some(mailbox) = self.inner.registry.mailbox(order_id) {
            match mailbox.deliver(Signal::new(order_id, kind)) {
                Ok(Admission::Pending(recorded)) => {
                    if recorded.await.is_ok() {
                        return Ok(Delivery::Accepted);
                    }
                    tracing::info!(%order_id, %kind, "saga stopped before recording the signal");
                }
                Ok(Admission::Dropped) => {
                    tracing::info!(%order_id, %kind, "signal dropped, a decision is already pending");
                    return Ok(Delivery::Dropped);
                }
                Err(e @ SignalError::NotAwaitingDecision(_)) => return Err(e.into()),
                Err(_) => {}
            }
        }

        match self.get_saga(order_id).await? {
            None => Err(SagaError::NotFound(order_id)),
            Some(saga) if saga.state().is_terminal() => Err(SignalError::Terminal {
                order_id,
                state: saga.state(),
            }
            .into()),
            Some(saga) if !saga.state().accepts_signals() => {
                Err(SignalError::NotAwaitingDecision(order_id).into())
            }
            Some(_) => Err(SignalError::NotRunning(order_id).into()),
        }
    }

    /// Loads a saga by replaying its checkpoints.
    pub async fn get_saga(&self, order_id: OrderId) -> Result<Option<SagaInstance>> {
        let (archive, records) = self.inner.store.load_saga(order_id).await?;
        SagaInstance::replay(order_id, archive, records)
    }

    /// Resumes every saga that has unfinished checkpoints.
    ///
    /// Sagas already running in this process and stalled sagas are skipped.
    /// A saga whose history cannot be replayed is logged and skipped.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<Vec<SagaHandle>> {
        let mut handles = Vec::new();

        for order_id in self.inner.store.active_sagas().await? {
            let lease = match self.inner.registry.acquire(order_id) {
                Ok(lease) => lease,
                Err(SagaError::AlreadyRunning(_)) => continue,
                Err(e) => return Err(e),
            };

            let saga = match self.get_saga(order_id).await {
                Ok(Some(saga)) => saga,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(%order_id, error = %e, "cannot replay saga, skipping");
                    continue;
                }
            };

            if saga.is_stalled() {
                tracing::debug!(%order_id, "saga stalled awaiting decision, not resuming");
                continue;
            }

            if saga.state().accepts_signals() {
                lease.mailbox().open_for_decision();
            }
            tracing::info!(%order_id, state = %saga.state(), sequence = %saga.sequence(), "resuming saga");
            metrics::counter!("saga_recovered_total").increment(1);
            handles.push(self.spawn(saga, lease));
        }

        Ok(handles)
    }

    /// Wakes every saga waiting for a decision so it returns
    /// [`SagaOutcome::Interrupted`].
    pub fn shutdown(&self) {
        self.inner.registry.close_all();
    }

    async fn begin(&self, order: Order) -> Result<(SagaInstance, SagaLease)> {
        let order_id = order.id();
        let lease = self.inner.registry.acquire(order_id)?;
        if self.inner.store.saga_exists(order_id).await? {
            return Err(SagaError::AlreadyExists(order_id));
        }

        let started_at = Utc::now();
        let deadline = deadline_after(started_at, self.inner.config.decision_timeout);
        let mut saga = SagaInstance::default();
        self.checkpoint(
            order_id,
            &mut saga,
            SagaEvent::saga_started(order, started_at, deadline),
        )
        .await?;

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(%order_id, %deadline, "saga started");
        Ok((saga, lease))
    }

    fn spawn(&self, saga: SagaInstance, lease: SagaLease) -> SagaHandle {
        let order_id = lease.order_id();
        let this = self.clone();
        let task = tokio::spawn(async move { this.drive(saga, lease).await });
        SagaHandle { order_id, task }
    }

    /// Runs the state machine from the saga's current state.
    #[tracing::instrument(skip(self, saga, lease), fields(order_id = %lease.order_id()))]
    async fn drive(&self, mut saga: SagaInstance, lease: SagaLease) -> Result<SagaOutcome> {
        let order_id = lease.order_id();
        let order = saga
            .order()
            .cloned()
            .ok_or_else(|| SagaError::CorruptCheckpoint {
                saga_id: order_id,
                reason: "history does not start with SagaStarted".to_string(),
            })?;
        let activities = &self.inner.activities;

        loop {
            if let Some(failure) = saga.pending_failure().cloned() {
                self.fail(&order, &mut saga, failure).await?;
                continue;
            }

            match saga.state() {
                SagaState::Created => {
                    let created_at = order.created_at();
                    self.run_step(order_id, &mut saga, STEP_CREATE, |ctx| async move {
                        activities
                            .create_order_record(&ctx, order_id, OrderStatus::Pending, created_at)
                            .await
                    })
                    .await?;
                }
                SagaState::PaymentPending => {
                    let amount = order.amount();
                    self.run_step(order_id, &mut saga, STEP_PAYMENT, |ctx| async move {
                        activities.process_payment(&ctx, order_id, amount).await
                    })
                    .await?;
                }
                SagaState::InventoryPending => {
                    let products = order.products();
                    self.run_step(order_id, &mut saga, STEP_INVENTORY, |ctx| async move {
                        activities.update_inventory(&ctx, order_id, products).await
                    })
                    .await?;
                }
                SagaState::AwaitingDecision => {
                    if saga.is_stalled() {
                        return Ok(SagaOutcome::Stalled);
                    }
                    if let Some(outcome) = self.await_decision(&mut saga, lease.mailbox()).await? {
                        return Ok(outcome);
                    }
                }
                SagaState::Completing => {
                    if saga.customer_notified().is_none() {
                        self.run_step(order_id, &mut saga, STEP_NOTIFY, |ctx| async move {
                            activities.notify_customer(&ctx, order_id).await
                        })
                        .await?;
                    }
                    if saga.customer_notified() == Some(false) {
                        tracing::warn!(%order_id, "customer notification failed, completing anyway");
                    }
                    self.checkpoint(order_id, &mut saga, SagaEvent::saga_completed())
                        .await?;
                }
                SagaState::Cancelling => {
                    self.compensate(&order, &mut saga, CompensationReason::UserCancelled)
                        .await?;
                    self.checkpoint(order_id, &mut saga, SagaEvent::saga_cancelled())
                        .await?;
                }
                SagaState::Completed | SagaState::Cancelled | SagaState::Failed => {
                    return self.finish(&saga, &lease).await;
                }
            }
        }
    }

    /// Checkpoints the start of `step` (unless it is already in flight),
    /// runs it through the executor and checkpoints its result.
    async fn run_step<F, Fut>(
        &self,
        order_id: OrderId,
        saga: &mut SagaInstance,
        step: &'static str,
        op: F,
    ) -> Result<()>
    where
        F: FnMut(ActivityContext) -> Fut,
        Fut: Future<Output = std::result::Result<(), ActivityError>>,
    {
        let resumed = saga
            .in_flight()
            .filter(|in_flight| in_flight.step == step)
            .map(|in_flight| in_flight.epoch);

        let epoch = match resumed {
            Some(epoch) => {
                tracing::info!(%order_id, step, epoch, "re-invoking step with unrecorded result");
                epoch
            }
            None => {
                let epoch = saga.next_epoch(step);
                self.checkpoint(order_id, saga, SagaEvent::step_started(step, epoch))
                    .await?;
                epoch
            }
        };

        let key = IdempotencyKey::new(order_id, step, epoch);
        tracing::info!(%order_id, step, "saga step started");
        let event = match self
            .inner
            .executor
            .execute(step, &key, &self.inner.config.retry_policy, op)
            .await
        {
            Ok(attempts) => SagaEvent::step_completed(step, attempts),
            Err(failure) => {
                tracing::error!(%order_id, step, error = %failure, "saga step failed");
                SagaEvent::step_failed(step, failure.error.message(), failure.attempts)
            }
        };
        self.checkpoint(order_id, saga, event).await
    }

    /// Waits for a decision. Returns an outcome when the execution ends here.
    async fn await_decision(
        &self,
        saga: &mut SagaInstance,
        mailbox: &Mailbox,
    ) -> Result<Option<SagaOutcome>> {
        let order_id = mailbox.saga_id();
        let deadline = saga.decision_deadline().unwrap_or_else(Utc::now);
        tracing::info!(%order_id, %deadline, "awaiting decision");

        let wakeup = self
            .inner
            .multiplexer
            .wait_next(mailbox, EventMultiplexer::instant_for(deadline))
            .await;

        match wakeup {
            Wakeup::Signal(decision) => {
                mailbox.close();
                let signal = decision.signal().clone();
                tracing::info!(%order_id, kind = %signal.kind, "decision received");
                self.checkpoint(
                    order_id,
                    saga,
                    SagaEvent::signal_received(signal.kind, signal.arrived_at),
                )
                .await?;
                decision.acknowledge();
                Ok(None)
            }
            Wakeup::TimedOut => {
                self.checkpoint(order_id, saga, SagaEvent::decision_timed_out())
                    .await?;
                metrics::counter!("saga_stalled_total").increment(1);
                tracing::warn!(%order_id, %deadline, "no decision before deadline, saga stalled");
                Ok(Some(SagaOutcome::Stalled))
            }
            Wakeup::Closed => {
                tracing::info!(%order_id, "decision wait interrupted");
                Ok(Some(SagaOutcome::Interrupted))
            }
        }
    }

    /// Compensates a forward step failure and records the saga as failed.
    async fn fail(&self, order: &Order, saga: &mut SagaInstance, failure: StepFailure) -> Result<()> {
        let message = match failure.step.as_str() {
            STEP_PAYMENT => {
                self.compensate(order, saga, CompensationReason::PaymentFailed)
                    .await?;
                format!("payment processing failed: {}", failure.error)
            }
            STEP_INVENTORY => {
                self.compensate(order, saga, CompensationReason::InventoryFailed)
                    .await?;
                format!("inventory update failed: {}", failure.error)
            }
            _ => failure.error.clone(),
        };

        self.checkpoint(order.id(), saga, SagaEvent::saga_failed(&failure.step, message))
            .await
    }

    /// Runs the compensation engine once per saga.
    ///
    /// A compensation started before a crash is re-run with the recorded
    /// steps; the activities see the same idempotency keys.
    async fn compensate(
        &self,
        order: &Order,
        saga: &mut SagaInstance,
        reason: CompensationReason,
    ) -> Result<()> {
        let order_id = order.id();
        let (reason, steps) = match saga.compensation().cloned() {
            Some(record) if record.report.is_some() => return Ok(()),
            Some(record) => (record.reason, record.steps),
            None => {
                let steps = saga.compensable_steps();
                self.checkpoint(
                    order_id,
                    saga,
                    SagaEvent::compensation_started(reason, steps.clone()),
                )
                .await?;
                (reason, steps)
            }
        };

        let engine = CompensationEngine::new(
            &self.inner.activities,
            &self.inner.executor,
            &self.inner.config.retry_policy,
        );
        let report = engine
            .compensate(order_id, order.amount(), reason, &steps)
            .await;

        self.checkpoint(order_id, saga, SagaEvent::compensation_completed(report))
            .await
    }

    /// Closes the mailbox, archives the terminal saga and reports the outcome.
    async fn finish(&self, saga: &SagaInstance, lease: &SagaLease) -> Result<SagaOutcome> {
        let order_id = lease.order_id();
        lease.mailbox().close();

        let archive = Archive::from_state(order_id, saga.sequence(), saga.state().as_str(), saga)?;
        self.inner.store.compact(archive).await?;
        self.inner.activities.release(order_id).await;

        if let Some(started_at) = saga.started_at() {
            let elapsed = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
            metrics::histogram!("saga_duration_seconds").record(elapsed);
        }

        match saga.state() {
            SagaState::Completed => {
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!(%order_id, "saga completed");
                Ok(SagaOutcome::Completed)
            }
            SagaState::Cancelled => {
                metrics::counter!("saga_cancelled_total").increment(1);
                tracing::info!(%order_id, "saga cancelled");
                Ok(SagaOutcome::Cancelled)
            }
            _ => {
                let step = saga.failed_step().unwrap_or_default().to_string();
                let message = saga.failure_reason().unwrap_or_default().to_string();
                metrics::counter!("saga_failed_total", "step" => step.clone()).increment(1);
                tracing::warn!(%order_id, %step, reason = %message, "saga failed");
                Err(SagaError::StepFailed { step, message })
            }
        }
    }

    /// Appends `event` after the saga's last sequence, then applies it.
    async fn checkpoint(
        &self,
        order_id: OrderId,
        saga: &mut SagaInstance,
        event: SagaEvent,
    ) -> Result<()> {
        let expected = saga.sequence();
        let mut record = CheckpointRecord::from_event(
            order_id,
            expected.next(),
            String::new(),
            event.event_type(),
            &event,
        )?;

        saga.apply(event);
        record.state = saga.state().as_str().to_string();

        // Admitted signals are acknowledged only after SignalReceived is durable.
        if saga.state().accepts_signals()
            && !saga.is_stalled()
            && let Some(mailbox) = self.inner.registry.mailbox(order_id)
        {
            mailbox.open_for_decision();
        }

        let sequence = self.inner.store.append(record, expected).await?;
        saga.set_sequence(sequence);
        Ok(())
    }
}

/// Returns `start + timeout`, saturating far in the future.
fn deadline_after(start: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
