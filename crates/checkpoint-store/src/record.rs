use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::OrderId;

/// Position of a checkpoint within one saga's history.
///
/// Sequences start at 1 for the first record and increase by exactly 1 for
/// each subsequent record. `Sequence::initial()` (0) denotes "no records".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(i64);

impl Sequence {
    /// Creates a sequence from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The sequence of a saga with no records.
    pub fn initial() -> Self {
        Self(0)
    }

    /// The sequence of a saga's first record.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next sequence.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw sequence value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Sequence {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// One confirmed saga transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The saga (order) this record belongs to.
    pub saga_id: OrderId,

    /// Position in the saga's history.
    pub sequence: Sequence,

    /// Name of the saga state after the transition was applied.
    pub state: String,

    /// Name of the transition (e.g. "StepCompleted").
    pub event_type: String,

    /// The transition itself, as JSON.
    pub payload: serde_json::Value,

    /// When the record was written.
    pub timestamp: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Creates a record from a serializable transition.
    pub fn from_event<T: Serialize>(
        saga_id: OrderId,
        sequence: Sequence,
        state: impl Into<String>,
        event_type: impl Into<String>,
        event: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            saga_id,
            sequence,
            state: state.into(),
            event_type: event_type.into(),
            payload: serde_json::to_value(event)?,
            timestamp: Utc::now(),
        })
    }

    /// Deserializes the payload into a concrete transition type.
    pub fn event<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
