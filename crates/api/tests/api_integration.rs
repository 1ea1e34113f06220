//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{AppState, SimulatedParticipants};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::CorrelationId;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Command, RetryPolicy};
use saga_store::InMemorySagaStore;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    state: Arc<AppState>,
    people: saga::InMemoryPeopleService,
    security: saga::InMemorySecurityService,
}

fn setup() -> TestApp {
    let policy = RetryPolicy::new(Duration::from_secs(10), 3, Duration::from_secs(60));
    let (state, participants) =
        api::create_default_state(Arc::new(InMemorySagaStore::new()), "memory", policy);
    let SimulatedParticipants {
        people,
        security,
        responses,
    } = participants;
    api::worker::spawn_response_consumer(state.orchestrator.clone(), responses);

    TestApp {
        app: api::create_app(state.clone(), get_metrics_handle()),
        state,
        people,
        security,
    }
}

fn worker_request(username: &str) -> Value {
    json!({
        "workerRequestId": "W1",
        "personPayload": { "name": "Ana", "lastName": "Silva" },
        "securityPayload": { "username": username, "roles": ["employee"] }
    })
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn start_worker(t: &TestApp, username: &str) -> String {
    let (status, json) = send(&t.app, "POST", "/workers", Some(worker_request(username))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    json["correlationId"].as_str().unwrap().to_string()
}

async fn wait_for_state(t: &TestApp, id: &str, state: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (status, json) = send(&t.app, "GET", &format!("/sagas/{id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            if json["state"] == state {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for saga state")
}

#[tokio::test]
async fn test_health_check() {
    let t = setup();

    let (status, json) = send(&t.app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_start_worker_completes() {
    let t = setup();

    let id = start_worker(&t, "ana").await;
    let saga = wait_for_state(&t, &id, "Completed").await;

    assert_eq!(saga["correlationId"], id.as_str());
    assert_eq!(saga["workerRequestId"], "W1");
    assert_eq!(saga["steps"].as_array().unwrap().len(), 2);
    assert!(saga["version"].as_i64().unwrap() > 0);
    assert!(t.security.has_account("ana").await);
}

#[tokio::test]
async fn test_duplicate_username_ends_compensated() {
    let t = setup();
    t.security.register_username("ana").await;

    let id = start_worker(&t, "ana").await;
    let saga = wait_for_state(&t, &id, "Compensated").await;

    assert_eq!(saga["failure"]["reason"], "duplicate username");
    assert_eq!(saga["compensationIncomplete"], false);
    assert_eq!(t.people.person_count().await, 0);
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let t = setup();

    let (status, json) = send(&t.app, "POST", "/workers", Some(worker_request("ana maria"))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("securityPayload.username"));
    assert_eq!(t.people.applied_count().await, 0);
}

#[tokio::test]
async fn test_duplicate_correlation_id_conflicts() {
    let t = setup();
    let id = CorrelationId::new().to_string();
    let mut body = worker_request("ana");
    body["correlationId"] = json!(id);

    let (first, json) = send(&t.app, "POST", "/workers", Some(body.clone())).await;
    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(json["correlationId"], id.as_str());

    let (second, _) = send(&t.app, "POST", "/workers", Some(body)).await;
    assert_eq!(second, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_bad_correlation_id() {
    let t = setup();
    let mut body = worker_request("ana");
    body["correlationId"] = json!("not-a-uuid");

    let (status, _) = send(&t.app, "POST", "/workers", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, "GET", "/sagas/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_saga() {
    let t = setup();
    let id = CorrelationId::new();

    let (status, _) = send(&t.app, "GET", &format!("/sagas/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, "POST", &format!("/sagas/{id}/abort"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stray_response_is_ignored() {
    let t = setup();
    let stray = Command::create_person(CorrelationId::new(), domain::PersonPayload::new("Ana"));
    let response = serde_json::to_value(saga::ResponseEvent::succeeded(&stray)).unwrap();

    let (status, json) = send(&t.app, "POST", "/responses", Some(response)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "ignored");
}

#[tokio::test]
async fn test_response_delivered_over_http() {
    let t = setup();
    t.people.set_silent(true).await;
    let id = start_worker(&t, "ana").await;
    let correlation_id = CorrelationId::parse(&id).unwrap();

    let create = Command::create_person(correlation_id, domain::PersonPayload::new("Ana"));
    let response = json!({
        "type": "StepSucceeded",
        "correlationId": id,
        "idempotencyKey": create.idempotency_key().as_str(),
    });

    let (status, json) = send(&t.app, "POST", "/responses", Some(response.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "applied");

    // Redelivery of the same response is a no-op.
    let (status, json) = send(&t.app, "POST", "/responses", Some(response)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "ignored");

    wait_for_state(&t, &id, "Completed").await;
}

#[tokio::test]
async fn test_abort_and_stuck_listing() {
    let t = setup();
    t.security.set_silent(true).await;
    let id = start_worker(&t, "ana").await;
    wait_for_state(&t, &id, "SecurityPending").await;

    let (status, stuck) = send(&t.app, "GET", "/sagas/stuck?older_than_secs=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        stuck
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["correlationId"] == id.as_str() && s["state"] == "SecurityPending")
    );

    let (status, fresh) = send(&t.app, "GET", "/sagas/stuck", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fresh.as_array().unwrap().is_empty());

    let (status, saga) = send(&t.app, "POST", &format!("/sagas/{id}/abort"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saga["state"], "CompensatingSecurity");
    assert_eq!(saga["failure"]["kind"], "aborted");

    // The compensation is answered once security comes back.
    t.security.set_silent(false).await;
    t.state
        .orchestrator
        .process_timeouts_at(chrono::Utc::now() + chrono::TimeDelta::minutes(5))
        .await
        .unwrap();
    wait_for_state(&t, &id, "Compensated").await;

    let (status, _) = send(&t.app, "POST", &format!("/sagas/{id}/abort"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_sweep_archives_finished_sagas() {
    let t = setup();
    let id = start_worker(&t, "ana").await;
    let mut saga = wait_for_state(&t, &id, "Completed").await;
    while !saga["outbox"].as_array().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
        saga = wait_for_state(&t, &id, "Completed").await;
    }

    let report = api::worker::sweep_once(&t.state.orchestrator, Duration::ZERO).await;
    assert_eq!(report.archived, 1);

    // Still inspectable from the archive.
    let saga = wait_for_state(&t, &id, "Completed").await;
    assert_eq!(saga["workerRequestId"], "W1");
}
