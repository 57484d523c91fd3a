//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Money amount represented in cents to avoid floating point issues.
///
/// Negative amounts only appear as refunds handed to the payment backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Converts a decimal amount (e.g. `100.00`) to cents, rounding to the
    /// nearest cent. Returns None for NaN, infinities and out-of-range values.
    pub fn from_decimal(amount: f64) -> Option<Self> {
        if !amount.is_finite() {
            return None;
        }
        let cents = (amount * 100.0).round();
        if cents.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Self(cents as i64))
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the amount as a decimal value.
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the same amount with the sign flipped (charge ⇄ refund).
    pub fn negate(&self) -> Self {
        Self(-self.0)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}
