//! Durable checkpoint store for saga executions.
//!
//! Every saga transition is appended here as a [`CheckpointRecord`] before
//! the saga moves on. Records for one saga carry strictly increasing,
//! gap-free sequence numbers; replaying them in order reconstructs the saga.
//! Once a saga is terminal its records are compacted into an [`Archive`].

pub mod archive;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use archive::Archive;
pub use common::OrderId;
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use postgres::PostgresCheckpointStore;
pub use record::{CheckpointRecord, Sequence};
pub use store::{CheckpointStore, CheckpointStoreExt};
