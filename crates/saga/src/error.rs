//! Saga error types.

use common::CorrelationId;
use domain::ValidationError;
use saga_store::SagaStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::{IdempotencyKey, Step};
use crate::state::SagaState;

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request was rejected before any saga was created.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A message referenced a saga that does not exist or was archived.
    #[error("Unknown saga: {0}")]
    UnknownSaga(CorrelationId),

    /// A response did not answer the currently outstanding command.
    #[error("Stale response for saga {correlation_id} with key {idempotency_key} in state {state}")]
    StaleResponse {
        correlation_id: CorrelationId,
        idempotency_key: IdempotencyKey,
        state: SagaState,
    },

    /// A saga with this correlation ID already exists.
    #[error("Saga already exists: {0}")]
    DuplicateSaga(CorrelationId),

    /// The saga already finished; the operation no longer applies.
    #[error("Saga {correlation_id} is already terminal ({state})")]
    AlreadyTerminal {
        correlation_id: CorrelationId,
        state: SagaState,
    },

    /// Compare-and-swap kept losing against other writers.
    #[error("Saga {0} is contended; gave up after repeated version conflicts")]
    Contention(CorrelationId),

    /// Saga store error.
    #[error("Saga store error: {0}")]
    Store(#[from] SagaStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true for errors that are logged and dropped by message
    /// handlers rather than surfaced.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            SagaError::UnknownSaga(_) | SagaError::StaleResponse { .. }
        )
    }
}

/// Why a saga stopped moving forward.
///
/// Recorded on the instance; the `Display` form is the reason carried by
/// `WorkerProvisioningFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    /// The participant explicitly rejected the command.
    #[error("{reason}")]
    Participant { step: Step, reason: String },

    /// No response arrived within the retry budget.
    #[error("{step} step timed out after {attempts} attempts")]
    Timeout { step: Step, attempts: u32 },

    /// An operator aborted the saga while the step was outstanding.
    #[error("aborted by operator")]
    Aborted { step: Step },
}

impl StepFailure {
    /// The step at which the saga failed.
    pub fn step(&self) -> Step {
        match self {
            StepFailure::Participant { step, .. }
            | StepFailure::Timeout { step, .. }
            | StepFailure::Aborted { step } => *step,
        }
    }
}

/// A compensating command that could not be confirmed within its retry
/// budget. The saga still terminates, flagged for operator follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("Compensation of {step} failed after {attempts} attempts: {reason}")]
pub struct CompensationFailure {
    pub step: Step,
    pub attempts: u32,
    pub reason: String,
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
