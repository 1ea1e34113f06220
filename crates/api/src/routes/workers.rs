//! Inbound provisioning requests.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::WorkerProvisioningRequested;
use serde::{Deserialize, Serialize};

use super::parse_correlation_id;
use crate::AppState;
use crate::error::ApiError;

/// A `WorkerProvisioningRequested` event, optionally with the correlation ID
/// to run it under.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkerRequest {
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub request: WorkerProvisioningRequested,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedResponse {
    pub correlation_id: String,
    pub worker_request_id: String,
}

/// POST /workers: start a provisioning saga.
///
/// Answers `202 Accepted` once the saga is stored; the outcome is published
/// later as a domain event.
#[tracing::instrument(skip_all, fields(worker_request_id = %body.request.worker_request_id))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartWorkerRequest>,
) -> Result<(StatusCode, Json<StartedResponse>), ApiError> {
    let worker_request_id = body.request.worker_request_id.to_string();

    let correlation_id = match body.correlation_id.as_deref() {
        Some(raw) => {
            let id = parse_correlation_id(raw)?;
            state.orchestrator.start_with_id(id, body.request).await?
        }
        None => state.orchestrator.start(body.request).await?,
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(StartedResponse {
            correlation_id: correlation_id.to_string(),
            worker_request_id,
        }),
    ))
}
