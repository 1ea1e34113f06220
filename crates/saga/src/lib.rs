//! Saga orchestration for worker provisioning.
//!
//! A `WorkerProvisioningRequested` event starts a saga that drives two
//! participant services in order:
//! 1. People: create the person record
//! 2. Security: create the security account
//!
//! Each step is one command answered asynchronously by a `StepSucceeded` or
//! `StepFailed` response. If a step fails, times out or is aborted, every
//! step that may have taken effect is undone in reverse order and the saga
//! ends with `WorkerProvisioningFailed`; otherwise it ends with
//! `WorkerProvisioned`.
//!
//! Instances are persisted through [`saga_store::SagaStore`] and published
//! through an [`EventBus`] via a per-instance outbox.

pub mod bus;
mod compensation;
pub mod contracts;
pub mod error;
pub mod instance;
mod machine;
pub mod orchestrator;
pub mod participants;
pub mod policy;
pub mod state;

pub use bus::{BusError, EventBus, InMemoryEventBus};
pub use contracts::{
    Command, IdempotencyKey, OutboundMessage, ResponseEvent, Step, WorkerEvent,
};
pub use error::{CompensationFailure, SagaError, StepFailure};
pub use instance::{
    Direction, PendingCommand, SAGA_TYPE, SagaInstance, StateChange, StepOutcome, StepRecord,
};
pub use orchestrator::{RecoveryReport, SagaOrchestrator};
pub use participants::{
    InMemoryPeopleService, InMemorySecurityService, LoopbackBus, Participant,
};
pub use policy::RetryPolicy;
pub use state::SagaState;
