use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, Sequence};

/// The compacted final state of a terminal saga.
///
/// Written by [`CheckpointStore::compact`](crate::CheckpointStore::compact),
/// which removes the saga's individual records in the same operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    /// The saga this archive belongs to.
    pub saga_id: OrderId,

    /// Sequence of the last record folded into the archive.
    pub sequence: Sequence,

    /// Terminal state name.
    pub state: String,

    /// When the archive was written.
    pub archived_at: DateTime<Utc>,

    /// The serialized saga state.
    pub payload: serde_json::Value,
}

impl Archive {
    /// Creates an archive from a serializable saga state.
    pub fn from_state<T: Serialize>(
        saga_id: OrderId,
        sequence: Sequence,
        state_name: impl Into<String>,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            saga_id,
            sequence,
            state: state_name.into(),
            archived_at: Utc::now(),
            payload: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the archived state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload)
    }
}
