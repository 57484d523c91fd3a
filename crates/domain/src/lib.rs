//! Domain layer for the order saga.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for checkpoint-replayed state
//! - The Order model with its status lifecycle and value objects

pub mod aggregate;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::DomainError;
pub use order::{Money, Order, OrderError, OrderStatus, ProductId};
