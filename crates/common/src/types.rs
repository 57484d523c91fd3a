use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an order.
///
/// The order id doubles as the saga handle: at most one saga execution
/// exists per order id, and checkpoints are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random order ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an order ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses an order ID from its hyphenated string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OrderId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<OrderId> for Uuid {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

/// Deterministic key handed to external operations so a retried call has
/// the same effect as a single one.
///
/// Formatted as `{order_id}:{step}:{epoch}`. The epoch is fixed when a step
/// is first checkpointed as started and reused on every retry and on
/// recovery of that step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Builds the key for a step of an order.
    pub fn new(order_id: OrderId, step: &str, epoch: u32) -> Self {
        Self(format!("{order_id}:{step}:{epoch}"))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_new_creates_unique_ids() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn order_id_parse_roundtrips_display() {
        let id = OrderId::new();
        assert_eq!(OrderId::parse(&id.to_string()).unwrap(), id);
        assert!(OrderId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn order_id_serializes_as_plain_uuid() {
        let id = OrderId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }

    #[test]
    fn idempotency_key_is_deterministic() {
        let id = OrderId::new();
        let a = IdempotencyKey::new(id, "payment", 1);
        let b = IdempotencyKey::new(id, "payment", 1);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), format!("{id}:payment:1"));
        assert_ne!(a, IdempotencyKey::new(id, "payment", 2));
        assert_ne!(a, IdempotencyKey::new(id, "inventory", 1));
    }
}
