//! The order record driven by the saga.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Money, OrderStatus, ProductId};

/// Errors raised when an order violates a data-model invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Amount is below zero.
    #[error("Invalid amount: {amount} (must not be negative)")]
    NegativeAmount { amount: Money },

    /// Order has no products.
    #[error("Order has no products")]
    NoProducts,
}

/// An order as tracked by its saga.
///
/// The identifier, amount, products and creation time are fixed at
/// creation. Only the saga changes the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    amount: Money,
    products: Vec<ProductId>,
}

impl Order {
    /// Creates a pending order with a fresh identifier.
    pub fn new(amount: Money, products: Vec<ProductId>) -> Result<Self, OrderError> {
        Self::with_id(OrderId::new(), amount, products, Utc::now())
    }

    /// Creates a pending order with an explicit identifier and timestamp.
    pub fn with_id(
        id: OrderId,
        amount: Money,
        products: Vec<ProductId>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if amount.is_negative() {
            return Err(OrderError::NegativeAmount { amount });
        }
        if products.is_empty() {
            return Err(OrderError::NoProducts);
        }
        Ok(Self {
            id,
            status: OrderStatus::Pending,
            created_at,
            amount,
            products,
        })
    }

    /// Returns the order ID.
    pub fn id(&self) -> OrderId {
        self.id
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns when the order was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the order amount.
    pub fn amount(&self) -> Money {
        self.amount
    }

    /// Returns the ordered product IDs.
    pub fn products(&self) -> &[ProductId] {
        &self.products
    }

    /// Sets the status. Called only while applying saga transitions.
    pub fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
    }
}
