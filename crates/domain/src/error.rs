//! Domain error types.

use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The order violates a data-model invariant.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
