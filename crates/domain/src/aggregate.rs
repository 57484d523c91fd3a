//! Core aggregate and domain event traits.

use checkpoint_store::Sequence;
use common::OrderId;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent transitions that have happened. They are
/// immutable and named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// Stored alongside each checkpoint record.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates rebuilt by replaying checkpointed events.
///
/// Aggregates:
/// - Are rebuilt by replaying events in sequence order
/// - Apply events to update state (pure, deterministic)
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier.
    ///
    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<OrderId>;

    /// Returns the sequence of the last applied checkpoint.
    fn sequence(&self) -> Sequence;

    /// Sets the sequence after a checkpoint is confirmed or replayed.
    fn set_sequence(&mut self, sequence: Sequence);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic:
    /// - Given the same state and event, it must always produce the same new state
    /// - It must not have side effects
    /// - It must not fail (events represent facts that have happened)
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
