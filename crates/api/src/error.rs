//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use saga_store::SagaStoreError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// Saga operation error.
    #[error(transparent)]
    Saga(#[from] SagaError),

    /// Store failure outside a saga operation.
    #[error(transparent)]
    Store(#[from] SagaStoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => saga_status(err),
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SagaError::UnknownSaga(_) => StatusCode::NOT_FOUND,
        SagaError::StaleResponse { .. }
        | SagaError::DuplicateSaga(_)
        | SagaError::AlreadyTerminal { .. }
        | SagaError::Contention(_) => StatusCode::CONFLICT,
        SagaError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        SagaError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
