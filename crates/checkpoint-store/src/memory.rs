use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Archive, CheckpointError, CheckpointRecord, OrderId, Result, Sequence,
    store::{CheckpointStore, validate_append},
};

/// In-memory checkpoint store.
///
/// Provides the same interface and sequencing rules as the PostgreSQL
/// implementation. Survives "restarts" within one process as long as a clone
/// of the store is kept, which is how recovery is exercised in tests.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    records: Arc<RwLock<BTreeMap<OrderId, Vec<CheckpointRecord>>>>,
    archives: Arc<RwLock<HashMap<OrderId, Archive>>>,
}

impl InMemoryCheckpointStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn current_sequence(history: Option<&Vec<CheckpointRecord>>) -> Sequence {
    history
        .and_then(|h| h.last())
        .map(|r| r.sequence)
        .unwrap_or(Sequence::initial())
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append(&self, record: CheckpointRecord, expected: Sequence) -> Result<Sequence> {
        validate_append(&record, expected)?;

        let saga_id = record.saga_id;
        let mut records = self.records.write().await;

        let actual = current_sequence(records.get(&saga_id));
        if actual != expected {
            return Err(CheckpointError::SequenceConflict {
                saga_id,
                expected,
                actual,
            });
        }
        if self.archives.read().await.contains_key(&saga_id) {
            return Err(CheckpointError::InvalidRecord(format!(
                "saga {saga_id} is archived"
            )));
        }

        let sequence = record.sequence;
        records.entry(saga_id).or_default().push(record);
        Ok(sequence)
    }

    async fn load(&self, saga_id: OrderId) -> Result<Vec<CheckpointRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&saga_id).cloned().unwrap_or_default())
    }

    async fn last_sequence(&self, saga_id: OrderId) -> Result<Option<Sequence>> {
        let records = self.records.read().await;
        Ok(records
            .get(&saga_id)
            .and_then(|h| h.last())
            .map(|r| r.sequence))
    }

    async fn compact(&self, archive: Archive) -> Result<()> {
        let saga_id = archive.saga_id;
        let mut records = self.records.write().await;
        let mut archives = self.archives.write().await;

        let actual = current_sequence(records.get(&saga_id));
        if actual != archive.sequence {
            return Err(CheckpointError::SequenceConflict {
                saga_id,
                expected: archive.sequence,
                actual,
            });
        }

        records.remove(&saga_id);
        archives.insert(saga_id, archive);
        Ok(())
    }

    async fn load_archive(&self, saga_id: OrderId) -> Result<Option<Archive>> {
        let archives = self.archives.read().await;
        Ok(archives.get(&saga_id).cloned())
    }

    async fn active_sagas(&self) -> Result<Vec<OrderId>> {
        let records = self.records.read().await;
        let archives = self.archives.read().await;
        Ok(records
            .iter()
            .filter(|(id, history)| !history.is_empty() && !archives.contains_key(id))
            .map(|(id, _)| *id)
            .collect())
    }
}
