use thiserror::Error;

use crate::{CorrelationId, Version};

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The record was written by someone else since it was read.
    #[error(
        "Concurrency conflict for saga {correlation_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        correlation_id: CorrelationId,
        expected: Version,
        actual: Version,
    },

    /// No hot record exists for the correlation ID.
    #[error("Saga not found: {0}")]
    NotFound(CorrelationId),

    /// The correlation ID belongs to an archived saga and cannot be reused.
    #[error("Saga already archived: {0}")]
    Archived(CorrelationId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
