//! HTTP route handlers.

pub mod ops;
pub mod responses;
pub mod sagas;
pub mod workers;

use common::CorrelationId;

use crate::error::ApiError;

fn parse_correlation_id(raw: &str) -> Result<CorrelationId, ApiError> {
    CorrelationId::parse(raw)
        .map_err(|e| ApiError::BadRequest(format!("Invalid correlation ID: {e}")))
}
