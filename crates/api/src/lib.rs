//! Operator HTTP API and background workers for the worker-provisioning saga.
//!
//! Exposes endpoints to start sagas, deliver participant responses and
//! inspect or abort running sagas, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    EventBus, InMemoryPeopleService, InMemorySecurityService, LoopbackBus, ResponseEvent,
    RetryPolicy, SagaOrchestrator,
};
use saga_store::SagaStore;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The orchestrator as wired by the server: store and bus chosen at startup.
pub type Orchestrator = SagaOrchestrator<Arc<dyn SagaStore>, Arc<dyn EventBus>>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Name of the store backend, reported by `/health`.
    pub store_backend: &'static str,
}

/// Handles to the in-process participants behind the loopback bus.
pub struct SimulatedParticipants {
    pub people: InMemoryPeopleService,
    pub security: InMemorySecurityService,
    /// Participant responses, to be fed to the orchestrator.
    pub responses: mpsc::UnboundedReceiver<ResponseEvent>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/workers", post(routes::workers::start))
        .route("/responses", post(routes::responses::deliver))
        .route("/sagas/stuck", get(routes::sagas::stuck))
        .route("/sagas/{id}", get(routes::sagas::get))
        .route("/sagas/{id}/abort", post(routes::sagas::abort))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over `store`, with simulated People and
/// Security participants connected through a loopback bus.
pub fn create_default_state(
    store: Arc<dyn SagaStore>,
    store_backend: &'static str,
    policy: RetryPolicy,
) -> (Arc<AppState>, SimulatedParticipants) {
    let people = InMemoryPeopleService::new();
    let security = InMemorySecurityService::new();
    let (bus, responses) = LoopbackBus::new();
    let bus = bus
        .with_participant(people.clone())
        .with_participant(security.clone());

    let orchestrator =
        SagaOrchestrator::new(store, Arc::new(bus) as Arc<dyn EventBus>).with_policy(policy);

    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        store_backend,
    });

    (
        state,
        SimulatedParticipants {
            people,
            security,
            responses,
        },
    )
}
