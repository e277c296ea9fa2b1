#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use brickyard_core::retry::RetryPolicy;
use brickyard_db::memory::{MemoryJobStore, MemoryTraceStore};
use brickyard_db::store::{JobStore, TraceStore};
use brickyard_events::{EventBus, LocalQueue, MessageQueue};
use brickyard_pipeline::JobOrchestrator;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use brickyard_api::config::ServerConfig;
use brickyard_api::router::build_app_router;
use brickyard_api::state::AppState;

pub const REQUEST_QUEUE: &str = "generation-requests";
pub const RESULT_QUEUE: &str = "generation-results";
pub const INTERNAL_TOKEN: &str = "test-internal-token";

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default),
/// a 30-second request timeout, and [`INTERNAL_TOKEN`] for callbacks.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        internal_api_token: Some(INTERNAL_TOKEN.to_string()),
    }
}

/// Retry policy with delays short enough for tests.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    }
}

/// Everything a test may want to poke at besides the router.
pub struct TestApp {
    pub router: Router,
    pub orchestrator: Arc<JobOrchestrator>,
    pub queue: Arc<LocalQueue>,
    pub events: Arc<EventBus>,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

pub fn build_orchestrator(
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn MessageQueue>,
    events: Arc<EventBus>,
) -> Arc<JobOrchestrator> {
    let traces: Arc<dyn TraceStore> = Arc::new(MemoryTraceStore::new());
    Arc::new(JobOrchestrator::new(
        jobs,
        traces,
        queue,
        events,
        REQUEST_QUEUE,
        fast_retry(),
    ))
}

/// Build the full application router over in-memory stores and queue.
///
/// Uses the same router construction as `main.rs` so integration tests
/// exercise the production middleware stack.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let queue = Arc::new(LocalQueue::new());
    let events = Arc::new(EventBus::default());
    let orchestrator = build_orchestrator(
        Arc::new(MemoryJobStore::new()),
        Arc::clone(&queue) as Arc<dyn MessageQueue>,
        Arc::clone(&events),
    );

    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        config: Arc::new(config.clone()),
        event_bus: Arc::clone(&events),
    };

    TestApp {
        router: build_app_router(state, &config),
        orchestrator,
        queue,
        events,
    }
}

/// A minimal valid submission body.
pub fn new_job_body() -> serde_json::Value {
    json!({
        "ownerId": "user-1",
        "title": "Red truck",
        "sourceImageUrl": "https://cdn.example.com/uploads/truck.png",
        "age": "8-9",
        "budget": 300,
    })
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST to an `/internal` route with the test token attached.
pub async fn post_internal(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-internal-token", INTERNAL_TOKEN)
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Submit a job over HTTP and return its JSON representation.
pub async fn create_job(app: Router) -> serde_json::Value {
    let response = post_json(app, "/api/v1/jobs", new_job_body()).await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    body_json(response).await["data"].clone()
}
