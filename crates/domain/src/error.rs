//! Domain error types.

use thiserror::Error;

/// Reasons a provisioning request is rejected before a saga is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// A field is present but malformed.
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

impl ValidationError {
    pub(crate) fn missing(field: &'static str) -> Self {
        ValidationError::MissingField { field }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Returns the name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField { field } | ValidationError::InvalidField { field, .. } => {
                field
            }
        }
    }
}
