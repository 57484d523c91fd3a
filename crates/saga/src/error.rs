//! Saga error types.

use std::time::Duration;

use checkpoint_store::CheckpointError;
use common::OrderId;
use domain::DomainError;
use thiserror::Error;

use crate::state::SagaState;

/// Errors returned by a single activity attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
    /// The attempt failed and may succeed if retried.
    #[error("{0}")]
    Transient(String),

    /// The attempt failed in a way retrying cannot fix.
    #[error("{0} (not retryable)")]
    NonRetryable(String),

    /// The attempt did not finish within its timeout.
    #[error("activity timed out after {0:?}")]
    TimedOut(Duration),
}

impl ActivityError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        ActivityError::Transient(message.into())
    }

    /// Creates a non-retryable error.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        ActivityError::NonRetryable(message.into())
    }

    /// Returns the error as the activity reported it, without the
    /// classification suffix.
    pub fn message(&self) -> String {
        match self {
            ActivityError::Transient(message) | ActivityError::NonRetryable(message) => {
                message.clone()
            }
            ActivityError::TimedOut(_) => self.to_string(),
        }
    }

    /// Returns true if the executor should try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ActivityError::NonRetryable(_))
    }
}

/// Final failure of an activity after its retry policy was exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{step}' failed after {attempts} attempt(s): {error}")]
pub struct ActivityFailure {
    /// The step that failed.
    pub step: String,
    /// How many attempts were made.
    pub attempts: u32,
    /// The error of the last attempt.
    pub error: ActivityError,
}

/// Reasons a signal cannot be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// No execution currently holds the saga, or it has already decided.
    #[error("Saga for order {0} is not accepting signals")]
    NotRunning(OrderId),

    /// The saga has not finished its forward steps yet.
    #[error("Saga for order {0} is not awaiting a decision yet")]
    NotAwaitingDecision(OrderId),

    /// The saga already reached a terminal state.
    #[error("Saga for order {order_id} already finished in state {state}")]
    Terminal { order_id: OrderId, state: SagaState },
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A forward step failed for good. The message is the one reported to
    /// the caller of the saga.
    #[error("{message}")]
    StepFailed { step: String, message: String },

    /// Checkpoint store error. Halts the execution.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Stored history cannot be replayed.
    #[error("Corrupt checkpoint for saga {saga_id}: {reason}")]
    CorruptCheckpoint { saga_id: OrderId, reason: String },

    /// Another execution holds the lease for this order.
    #[error("Saga for order {0} is already running")]
    AlreadyRunning(OrderId),

    /// A saga was already recorded for the order.
    #[error("Saga for order {0} already exists")]
    AlreadyExists(OrderId),

    /// No saga exists for the order.
    #[error("Saga not found for order {0}")]
    NotFound(OrderId),

    /// Signal was rejected.
    #[error("Signal rejected: {0}")]
    Signal(#[from] SignalError),

    /// The saga task panicked or was aborted.
    #[error("Saga task for order {order_id} aborted: {reason}")]
    Aborted { order_id: OrderId, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
