//! Durable order saga.
//!
//! Orchestrates the order lifecycle as a saga whose every transition is
//! checkpointed before it is acted on:
//! 1. Create the order record
//! 2. Process the payment
//! 3. Update inventory
//! 4. Wait for a `complete` or `cancel` decision
//!
//! A failed payment or inventory step compensates the completed steps in
//! reverse order. After a restart, [`SagaOrchestrator::recover`] replays the
//! checkpoints and resumes every unfinished saga from its last confirmed
//! transition.

pub mod activities;
pub mod aggregate;
pub mod compensation;
pub mod error;
pub mod events;
pub mod executor;
pub mod multiplexer;
pub mod order_fulfillment;
pub mod orchestrator;
pub mod registry;
pub mod state;

pub use activities::{
    ActivityCall, ActivityContext, FailureMode, InMemoryOrderActivities, Operation,
    OrderActivities,
};
pub use aggregate::SagaInstance;
pub use compensation::{
    CompensationEngine, CompensationOutcome, CompensationReason, CompensationReport,
    CompensationStepStatus,
};
pub use error::{ActivityError, ActivityFailure, SagaError, SignalError};
pub use events::SagaEvent;
pub use executor::{ActivityExecutor, RetryPolicy};
pub use multiplexer::{Delivery, EventMultiplexer, InvalidSignalKind, Signal, SignalKind};
pub use orchestrator::{SagaConfig, SagaHandle, SagaOrchestrator, SagaOutcome};
pub use registry::{SagaLease, SagaRegistry};
pub use state::SagaState;
