use thiserror::Error;

use crate::{OrderId, Sequence};

/// Errors that can occur when interacting with the checkpoint store.
///
/// Any of these returned from an append means the transition was not
/// confirmed; callers must not proceed as if it had been.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The append did not continue the saga's sequence exactly.
    #[error(
        "Sequence conflict for saga {saga_id}: expected sequence {expected}, found {actual}"
    )]
    SequenceConflict {
        saga_id: OrderId,
        expected: Sequence,
        actual: Sequence,
    },

    /// The record or archive handed to the store is malformed.
    #[error("Invalid checkpoint: {0}")]
    InvalidRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for checkpoint store operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;
