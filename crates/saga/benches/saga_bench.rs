use checkpoint_store::{CheckpointRecord, OrderId, Sequence};
use chrono::{Duration, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Aggregate, DomainEvent, Money, Order};
use saga::{
    ActivityExecutor, InMemoryOrderActivities, RetryPolicy, SagaEvent, SagaInstance,
    SagaOrchestrator, SagaOutcome, SagaState, SignalKind,
};

fn make_order() -> Order {
    Order::new(Money::from_cents(4_999), vec!["SKU-001".into(), "SKU-002".into()]).unwrap()
}

/// Records of a saga that went through every forward step and was cancelled.
fn cancelled_history(order: &Order) -> Vec<CheckpointRecord> {
    let now = Utc::now();
    let events = vec![
        SagaEvent::saga_started(order.clone(), now, now + Duration::hours(24)),
        SagaEvent::step_started("create", 1),
        SagaEvent::step_completed("create", 1),
        SagaEvent::step_started("payment", 1),
        SagaEvent::step_completed("payment", 2),
        SagaEvent::step_started("inventory", 1),
        SagaEvent::step_completed("inventory", 1),
        SagaEvent::signal_received(SignalKind::Cancel, now),
        SagaEvent::compensation_started(
            saga::CompensationReason::UserCancelled,
            vec!["payment".to_string(), "inventory".to_string()],
        ),
        SagaEvent::compensation_completed(Default::default()),
        SagaEvent::saga_cancelled(),
    ];

    let mut saga = SagaInstance::default();
    events
        .into_iter()
        .enumerate()
        .map(|(i, event)| {
            saga.apply(event.clone());
            CheckpointRecord::from_event(
                order.id(),
                Sequence::new(i as i64 + 1),
                saga.state().as_str(),
                event.event_type(),
                &event,
            )
            .unwrap()
        })
        .collect()
}

fn bench_replay_history(c: &mut Criterion) {
    let order = make_order();
    let records = cancelled_history(&order);

    c.bench_function("saga/replay_cancelled_history", |b| {
        b.iter(|| {
            let saga = SagaInstance::replay(order.id(), None, records.clone())
                .unwrap()
                .unwrap();
            assert!(saga.state().is_terminal());
        });
    });
}

fn bench_executor_success(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let executor = ActivityExecutor::new();
    let policy = RetryPolicy::default();
    let key = common::IdempotencyKey::new(OrderId::new(), "payment", 1);

    c.bench_function("saga/executor_first_attempt", |b| {
        b.iter(|| {
            rt.block_on(async {
                executor
                    .execute("payment", &key, &policy, |_ctx| async { Ok(()) })
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_full_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga/complete_in_memory", |b| {
        b.iter(|| {
            rt.block_on(async {
                let orchestrator = SagaOrchestrator::new(
                    checkpoint_store::InMemoryCheckpointStore::new(),
                    InMemoryOrderActivities::new(),
                );
                let order = make_order();
                let order_id = order.id();
                let handle = orchestrator.start(order).await.unwrap();
                while orchestrator
                    .get_saga(order_id)
                    .await
                    .unwrap()
                    .map(|saga| saga.state())
                    != Some(SagaState::AwaitingDecision)
                {
                    tokio::task::yield_now().await;
                }
                orchestrator
                    .signal(order_id, SignalKind::Complete)
                    .await
                    .unwrap();
                assert_eq!(handle.outcome().await.unwrap(), SagaOutcome::Completed);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_replay_history,
    bench_executor_success,
    bench_full_saga
);
criterion_main!(benches);
