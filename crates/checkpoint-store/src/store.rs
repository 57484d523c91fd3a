use std::sync::Arc;

use async_trait::async_trait;

use crate::{Archive, CheckpointError, CheckpointRecord, OrderId, Result, Sequence};

/// Core trait for checkpoint store implementations.
///
/// A checkpoint store is the single source of truth for saga progress
/// across process restarts. All implementations must be thread-safe.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Appends one record to a saga's history.
    ///
    /// `expected` is the saga's current last sequence; the record must carry
    /// `expected.next()`. Fails with `SequenceConflict` otherwise. When this
    /// returns `Ok` the record is durable.
    ///
    /// Returns the sequence of the appended record.
    async fn append(&self, record: CheckpointRecord, expected: Sequence) -> Result<Sequence>;

    /// Retrieves all records of a saga in sequence order (oldest first).
    async fn load(&self, saga_id: OrderId) -> Result<Vec<CheckpointRecord>>;

    /// Gets the last sequence of a saga, or None if it has no records.
    async fn last_sequence(&self, saga_id: OrderId) -> Result<Option<Sequence>>;

    /// Replaces a terminal saga's records with its archive.
    ///
    /// `archive.sequence` must equal the saga's last sequence.
    async fn compact(&self, archive: Archive) -> Result<()>;

    /// Retrieves the archive of a compacted saga.
    async fn load_archive(&self, saga_id: OrderId) -> Result<Option<Archive>>;

    /// Lists sagas that have records and no archive, i.e. candidates for
    /// crash recovery.
    async fn active_sagas(&self) -> Result<Vec<OrderId>>;
}

/// Extension trait providing convenience methods for checkpoint stores.
#[async_trait]
pub trait CheckpointStoreExt: CheckpointStore {
    /// Checks whether anything is known about a saga.
    async fn saga_exists(&self, saga_id: OrderId) -> Result<bool> {
        if self.last_sequence(saga_id).await?.is_some() {
            return Ok(true);
        }
        Ok(self.load_archive(saga_id).await?.is_some())
    }

    /// Loads a saga's archive if it was compacted, otherwise its records.
    async fn load_saga(
        &self,
        saga_id: OrderId,
    ) -> Result<(Option<Archive>, Vec<CheckpointRecord>)> {
        if let Some(archive) = self.load_archive(saga_id).await? {
            Ok((Some(archive), Vec::new()))
        } else {
            let records = self.load(saga_id).await?;
            Ok((None, records))
        }
    }
}

// Blanket implementation for all CheckpointStore implementations
impl<T: CheckpointStore + ?Sized> CheckpointStoreExt for T {}

/// Lets a backend chosen at runtime be shared as `Arc<dyn CheckpointStore>`.
#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn append(&self, record: CheckpointRecord, expected: Sequence) -> Result<Sequence> {
        (**self).append(record, expected).await
    }

    async fn load(&self, saga_id: OrderId) -> Result<Vec<CheckpointRecord>> {
        (**self).load(saga_id).await
    }

    async fn last_sequence(&self, saga_id: OrderId) -> Result<Option<Sequence>> {
        (**self).last_sequence(saga_id).await
    }

    async fn compact(&self, archive: Archive) -> Result<()> {
        (**self).compact(archive).await
    }

    async fn load_archive(&self, saga_id: OrderId) -> Result<Option<Archive>> {
        (**self).load_archive(saga_id).await
    }

    async fn active_sagas(&self) -> Result<Vec<OrderId>> {
        (**self).active_sagas().await
    }
}

/// Validates a record before appending it after `expected`.
pub fn validate_append(record: &CheckpointRecord, expected: Sequence) -> Result<()> {
    if record.sequence != expected.next() {
        return Err(CheckpointError::InvalidRecord(format!(
            "record sequence {} does not follow {}",
            record.sequence, expected
        )));
    }
    if record.state.is_empty() || record.event_type.is_empty() {
        return Err(CheckpointError::InvalidRecord(
            "state and event_type are required".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: i64) -> CheckpointRecord {
        CheckpointRecord::from_event(
            OrderId::new(),
            Sequence::new(sequence),
            "Created",
            "SagaStarted",
            &serde_json::json!({}),
        )
        .unwrap()
    }

    #[test]
    fn validate_accepts_next_sequence() {
        assert!(validate_append(&record(1), Sequence::initial()).is_ok());
        assert!(validate_append(&record(4), Sequence::new(3)).is_ok());
    }

    #[test]
    fn validate_rejects_gaps_and_rewinds() {
        assert!(matches!(
            validate_append(&record(3), Sequence::first()),
            Err(CheckpointError::InvalidRecord(_))
        ));
        assert!(matches!(
            validate_append(&record(1), Sequence::first()),
            Err(CheckpointError::InvalidRecord(_))
        ));
    }

    #[test]
    fn validate_rejects_missing_names() {
        let mut r = record(1);
        r.state.clear();
        assert!(validate_append(&r, Sequence::initial()).is_err());
    }
}
