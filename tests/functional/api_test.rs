//! Functional tests for the HTTP API

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    response::Response,
    Router,
};
use gen_task_dispatcher::{api, config::Settings, provider::ImageProvider, task::TaskStatus, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use super::support::{
    build_state_with_settings, pool_config, wait_for_status, wait_for_terminal, Behavior,
    MemoryStorage, MockProvider,
};

struct TestApp {
    state: Arc<AppState>,
    router: Router,
    storage: Arc<MemoryStorage>,
}

fn test_app(behavior: Behavior, configure: impl FnOnce(&mut Settings)) -> TestApp {
    let provider: Arc<dyn ImageProvider> = Arc::new(MockProvider::new("mock", behavior));
    let storage = Arc::new(MemoryStorage::default());
    let mut settings = Settings::default();
    settings.pool = pool_config(1, 10);
    configure(&mut settings);

    let state = build_state_with_settings(vec![provider], storage.clone(), settings);
    let router = api::create_router(state.clone());
    TestApp {
        state,
        router,
        storage,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_submit_then_poll() {
    let app = test_app(Behavior::Return(2), |_| {});

    let response = send(
        &app.router,
        post_json(
            "/v1/tasks",
            json!({ "prompt": "two dogs", "provider": "mock", "count": 2, "aspectRatio": "3:2", "resolution": "4K" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "pending");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    wait_for_terminal(&app.state, &task_id).await;

    let response = send(&app.router, get(&format!("/v1/tasks/{}", task_id))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["completed_count"], 2);
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["images"].as_array().unwrap().len(), 2);
    assert_eq!(body["settings"]["aspect_ratio"], "3:2");
    assert_eq!(body["settings"]["resolution"], "high");
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let app = test_app(Behavior::Return(1), |_| {});

    let response = send(&app.router, get("/v1/tasks/does-not-exist")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "task_not_found");
}

/// Task snapshots carried by the `data:` lines of an event stream
async fn stream_snapshots(response: Response) -> Vec<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

async fn submit(app: &TestApp, prompt: &str) -> String {
    let response = send(
        &app.router,
        post_json("/v1/tasks", json!({ "prompt": prompt, "provider": "mock" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    json_body(response).await["task_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_stream_of_finished_task_sends_one_snapshot() {
    let app = test_app(Behavior::Return(1), |_| {});
    let task_id = submit(&app, "a lighthouse").await;
    wait_for_terminal(&app.state, &task_id).await;

    let response = send(&app.router, get(&format!("/v1/tasks/{}/stream", task_id))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_TYPE].to_str().unwrap(),
        "text/event-stream"
    );

    let snapshots = stream_snapshots(response).await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0]["status"], "completed");
    assert_eq!(snapshots[0]["completed_count"], 1);
}

#[tokio::test]
async fn test_stream_follows_task_until_terminal() {
    let app = test_app(Behavior::Sleep(Duration::from_millis(200), 1), |settings| {
        settings.server.stream_poll_interval_ms = 20;
    });
    let task_id = submit(&app, "a slow lighthouse").await;

    let response = send(&app.router, get(&format!("/v1/tasks/{}/stream", task_id))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let snapshots = tokio::time::timeout(Duration::from_secs(5), stream_snapshots(response))
        .await
        .expect("stream closes once the task finishes");
    assert!(snapshots.len() >= 2, "{:?}", snapshots);
    assert_ne!(snapshots[0]["status"], "completed");
    assert_eq!(snapshots.last().unwrap()["status"], "completed");

    // Only changes are sent
    for pair in snapshots.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[tokio::test]
async fn test_stream_of_unknown_task_is_404() {
    let app = test_app(Behavior::Return(1), |_| {});

    let response = send(&app.router, get("/v1/tasks/does-not-exist/stream")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "task_not_found");
}

#[tokio::test]
async fn test_invalid_submissions_are_400() {
    let app = test_app(Behavior::Return(1), |_| {});

    let cases = [
        (json!({ "prompt": "x", "provider": "mock", "count": 11 }), "invalid_count"),
        (json!({ "prompt": "x", "provider": "mock", "aspect_ratio": "7:5" }), "invalid_aspect_ratio"),
        (json!({ "prompt": "x", "provider": "nope" }), "invalid_provider"),
        (json!({ "prompt": "", "provider": "mock" }), "invalid_prompt"),
        (json!({ "prompt": "x", "provider": "mock", "reference_images": ["%%%"] }), "invalid_reference_images"),
    ];

    for (body, code) in cases {
        let response = send(&app.router, post_json("/v1/tasks", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], code);
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    assert!(app.state.store.is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let app = test_app(Behavior::Return(1), |_| {});

    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/tasks")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_body");
}

#[tokio::test]
async fn test_full_queue_is_503() {
    let app = test_app(Behavior::Return(1), |settings| settings.pool.queue_capacity = 0);

    let response = send(
        &app.router,
        post_json("/v1/tasks", json!({ "prompt": "x", "provider": "mock" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "queue_full");
    assert!(app.state.store.is_empty());
}

#[tokio::test]
async fn test_delete_requires_terminal_status() {
    let app = test_app(Behavior::Sleep(Duration::from_millis(200), 1), |_| {});

    let handle = app
        .state
        .gate
        .submit(gen_task_dispatcher::task::GenerationParams::new("x"), "mock", None)
        .unwrap();
    let uri = format!("/v1/tasks/{}", handle.task_id);
    wait_for_status(&app.state, &handle.task_id, |s| s == TaskStatus::Processing).await;

    let response = send(&app.router, delete(&uri)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let task = wait_for_terminal(&app.state, &handle.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let response = send(&app.router, delete(&uri)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage.deleted(), vec![task.images[0].path.clone()]);

    let response = send(&app.router, get(&uri)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_pool() {
    let app = test_app(Behavior::Return(1), |_| {});

    let response = send(&app.router, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pool"]["workers"], 1);
    assert_eq!(body["pool"]["queue_capacity"], 10);
    assert_eq!(body["providers"], json!(["mock"]));

    app.state.pool.shutdown(Duration::from_millis(10)).await;
    let body = json_body(send(&app.router, get("/health")).await).await;
    assert_eq!(body["status"], "draining");
}

#[tokio::test]
async fn test_api_key_required_when_enabled() {
    let app = test_app(Behavior::Return(1), |settings| {
        settings.auth.enabled = true;
        settings.auth.api_keys = vec!["secret".to_string()];
    });

    let response = send(&app.router, get("/v1/tasks/anything")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/v1/tasks/anything")
        .header("x-api-key", "secret")
        .body(Body::empty())
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app.router, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
}
