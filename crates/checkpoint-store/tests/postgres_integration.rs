//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate the tables
//! between tests, so they run serially. Run with:
//!
//! ```bash
//! cargo test -p checkpoint-store --test postgres_integration
//! ```

use std::sync::Arc;

use checkpoint_store::{
    Archive, CheckpointError, CheckpointRecord, CheckpointStore, CheckpointStoreExt, OrderId,
    PostgresCheckpointStore, Sequence,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_checkpoints_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresCheckpointStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE checkpoints, checkpoint_archives")
        .execute(&pool)
        .await
        .unwrap();

    PostgresCheckpointStore::new(pool)
}

fn make_record(saga_id: OrderId, sequence: i64, event_type: &str) -> CheckpointRecord {
    CheckpointRecord::from_event(
        saga_id,
        Sequence::new(sequence),
        "PaymentPending",
        event_type,
        &serde_json::json!({"step": "payment"}),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn append_and_load_records() {
    let store = get_test_store().await;
    let saga_id = OrderId::new();

    for seq in 1..=3 {
        let result = store
            .append(make_record(saga_id, seq, "StepStarted"), Sequence::new(seq - 1))
            .await;
        assert_eq!(result.unwrap(), Sequence::new(seq));
    }

    let records = store.load(saga_id).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].sequence, Sequence::first());
    assert_eq!(records[2].sequence, Sequence::new(3));
    assert_eq!(records[1].payload["step"], "payment");
    assert_eq!(store.last_sequence(saga_id).await.unwrap(), Some(Sequence::new(3)));
}

#[tokio::test]
#[serial]
async fn stale_writer_gets_sequence_conflict() {
    let store = get_test_store().await;
    let saga_id = OrderId::new();

    store
        .append(make_record(saga_id, 1, "SagaStarted"), Sequence::initial())
        .await
        .unwrap();
    store
        .append(make_record(saga_id, 2, "StepStarted"), Sequence::first())
        .await
        .unwrap();

    let result = store
        .append(make_record(saga_id, 2, "StepStarted"), Sequence::first())
        .await;
    assert!(matches!(
        result,
        Err(CheckpointError::SequenceConflict { .. })
    ));
    assert_eq!(store.load(saga_id).await.unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn compact_archives_and_deletes_records() {
    let store = get_test_store().await;
    let saga_id = OrderId::new();
    let other = OrderId::new();

    store
        .append(make_record(saga_id, 1, "SagaStarted"), Sequence::initial())
        .await
        .unwrap();
    store
        .append(make_record(other, 1, "SagaStarted"), Sequence::initial())
        .await
        .unwrap();

    let archive = Archive::from_state(
        saga_id,
        Sequence::first(),
        "Failed",
        &serde_json::json!({"state": "Failed"}),
    )
    .unwrap();
    store.compact(archive).await.unwrap();

    assert!(store.load(saga_id).await.unwrap().is_empty());
    let archived = store.load_archive(saga_id).await.unwrap().unwrap();
    assert_eq!(archived.state, "Failed");
    assert_eq!(archived.payload["state"], "Failed");
    assert!(store.saga_exists(saga_id).await.unwrap());

    assert_eq!(store.active_sagas().await.unwrap(), vec![other]);

    let result = store
        .append(make_record(saga_id, 2, "StepStarted"), Sequence::first())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
#[serial]
async fn unknown_saga_has_no_state() {
    let store = get_test_store().await;
    let saga_id = OrderId::new();

    assert!(store.load(saga_id).await.unwrap().is_empty());
    assert!(store.load_archive(saga_id).await.unwrap().is_none());
    assert!(!store.saga_exists(saga_id).await.unwrap());
}
