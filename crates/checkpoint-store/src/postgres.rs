use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Archive, CheckpointError, CheckpointRecord, OrderId, Result, Sequence,
    store::{CheckpointStore, validate_append},
};

/// PostgreSQL-backed checkpoint store.
///
/// An append is acknowledged only after its transaction commits, so a
/// returned `Ok` survives a process crash.
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Creates a new PostgreSQL checkpoint store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and runs the migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<CheckpointRecord> {
        Ok(CheckpointRecord {
            saga_id: OrderId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            sequence: Sequence::new(row.try_get("sequence")?),
            state: row.try_get("state")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get("recorded_at")?,
        })
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn append(&self, record: CheckpointRecord, expected: Sequence) -> Result<Sequence> {
        validate_append(&record, expected)?;

        let saga_id = record.saga_id;
        let mut tx = self.pool.begin().await?;

        let archived: Option<i64> =
            sqlx::query_scalar("SELECT sequence FROM checkpoint_archives WHERE saga_id = $1")
                .bind(saga_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if archived.is_some() {
            return Err(CheckpointError::InvalidRecord(format!(
                "saga {saga_id} is archived"
            )));
        }

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM checkpoints WHERE saga_id = $1")
                .bind(saga_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let actual = Sequence::new(current.unwrap_or(0));
        if actual != expected {
            return Err(CheckpointError::SequenceConflict {
                saga_id,
                expected,
                actual,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO checkpoints (saga_id, sequence, state, event_type, payload, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(saga_id.as_uuid())
        .bind(record.sequence.as_i64())
        .bind(&record.state)
        .bind(&record.event_type)
        .bind(&record.payload)
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            // A concurrent writer won the race for this sequence
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_saga_sequence")
            {
                return CheckpointError::SequenceConflict {
                    saga_id,
                    expected,
                    actual: record.sequence,
                };
            }
            CheckpointError::Database(e)
        })?;

        tx.commit().await?;
        metrics::counter!("checkpoint_appends_total").increment(1);
        Ok(record.sequence)
    }

    async fn load(&self, saga_id: OrderId) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT saga_id, sequence, state, event_type, payload, recorded_at
            FROM checkpoints
            WHERE saga_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn last_sequence(&self, saga_id: OrderId) -> Result<Option<Sequence>> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM checkpoints WHERE saga_id = $1")
                .bind(saga_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(current.map(Sequence::new))
    }

    async fn compact(&self, archive: Archive) -> Result<()> {
        let saga_id = archive.saga_id;
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(sequence) FROM checkpoints WHERE saga_id = $1",
        )
        .bind(saga_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;
        let actual = Sequence::new(current.unwrap_or(0));
        if actual != archive.sequence {
            return Err(CheckpointError::SequenceConflict {
                saga_id,
                expected: archive.sequence,
                actual,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO checkpoint_archives (saga_id, sequence, state, payload, archived_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(saga_id.as_uuid())
        .bind(archive.sequence.as_i64())
        .bind(&archive.state)
        .bind(&archive.payload)
        .bind(archive.archived_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM checkpoints WHERE saga_id = $1")
            .bind(saga_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_archive(&self, saga_id: OrderId) -> Result<Option<Archive>> {
        let row = sqlx::query(
            r#"
            SELECT saga_id, sequence, state, payload, archived_at
            FROM checkpoint_archives
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Archive> {
            Ok(Archive {
                saga_id: OrderId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
                sequence: Sequence::new(row.try_get("sequence")?),
                state: row.try_get("state")?,
                archived_at: row.try_get("archived_at")?,
                payload: row.try_get("payload")?,
            })
        })
        .transpose()
    }

    async fn active_sagas(&self) -> Result<Vec<OrderId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT c.saga_id
            FROM checkpoints c
            LEFT JOIN checkpoint_archives a ON a.saga_id = c.saga_id
            WHERE a.saga_id IS NULL
            ORDER BY c.saga_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(OrderId::from_uuid).collect())
    }
}
