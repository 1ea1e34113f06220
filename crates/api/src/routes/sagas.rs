//! Saga inspection and operator actions.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use saga::{SagaInstance, SagaState};
use serde::{Deserialize, Serialize};

use super::parse_correlation_id;
use crate::AppState;
use crate::error::ApiError;

const DEFAULT_STUCK_AGE_SECS: u64 = 300;

/// Full saga snapshot plus its store version.
#[derive(Serialize)]
pub struct SagaView {
    pub version: i64,
    #[serde(flatten)]
    pub saga: SagaInstance,
}

impl From<SagaInstance> for SagaView {
    fn from(saga: SagaInstance) -> Self {
        Self {
            version: saga.version().as_i64(),
            saga,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckSaga {
    pub correlation_id: String,
    pub worker_request_id: String,
    pub state: SagaState,
    pub updated_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl From<&SagaInstance> for StuckSaga {
    fn from(saga: &SagaInstance) -> Self {
        Self {
            correlation_id: saga.correlation_id().to_string(),
            worker_request_id: saga.worker_request_id().to_string(),
            state: saga.state(),
            updated_at: saga.updated_at(),
            attempts: saga.pending().map(|p| p.attempts).unwrap_or(0),
            last_error: saga.last_error().map(String::from),
        }
    }
}

#[derive(Deserialize)]
pub struct StuckQuery {
    pub older_than_secs: Option<u64>,
}

/// GET /sagas/{id}: current snapshot, hot or archived.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaView>, ApiError> {
    let correlation_id = parse_correlation_id(&id)?;
    let saga = state.orchestrator.inspect(correlation_id).await?;
    Ok(Json(saga.into()))
}

/// POST /sagas/{id}/abort: fail the outstanding forward step and compensate.
#[tracing::instrument(skip(state))]
pub async fn abort(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaView>, ApiError> {
    let correlation_id = parse_correlation_id(&id)?;
    let saga = state.orchestrator.abort(correlation_id).await?;
    Ok(Json(saga.into()))
}

/// GET /sagas/stuck?older_than_secs=N: non-terminal sagas idle for N seconds.
#[tracing::instrument(skip(state, query))]
pub async fn stuck(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StuckQuery>,
) -> Result<Json<Vec<StuckSaga>>, ApiError> {
    let older_than =
        Duration::from_secs(query.older_than_secs.unwrap_or(DEFAULT_STUCK_AGE_SECS));
    let sagas = state.orchestrator.list_stuck(older_than).await?;
    Ok(Json(sagas.iter().map(StuckSaga::from).collect()))
}
