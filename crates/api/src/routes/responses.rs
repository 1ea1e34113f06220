//! Participant response delivery.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use saga::{ResponseEvent, SagaState};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseAck {
    /// `applied` or `ignored`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SagaState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// POST /responses: deliver a `StepSucceeded` or `StepFailed` response.
///
/// Stale and unknown responses are acknowledged as ignored so that a
/// redelivering transport does not retry them.
#[tracing::instrument(skip_all, fields(correlation_id = %response.correlation_id()))]
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    Json(response): Json<ResponseEvent>,
) -> Result<(StatusCode, Json<ResponseAck>), ApiError> {
    let ack = match state.orchestrator.on_response(response).await {
        Ok(saga) => ResponseAck {
            status: "applied",
            state: Some(saga.state()),
            reason: None,
        },
        Err(e) if e.is_ignorable() => {
            tracing::warn!(error = %e, "response ignored");
            ResponseAck {
                status: "ignored",
                state: None,
                reason: Some(e.to_string()),
            }
        }
        Err(e) => return Err(e.into()),
    };

    Ok((StatusCode::ACCEPTED, Json(ack)))
}
