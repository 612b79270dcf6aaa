//! Functional tests for API key authentication

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    routing::get,
    Router,
};
use gen_task_dispatcher::middleware::auth::{AuthLayer, API_KEY_HEADER};
use tower::ServiceExt;

fn create_test_app() -> Router {
    Router::new()
        .route("/health", get(|| async { "healthy" }))
        .route("/test", get(|| async { "OK" }))
        .layer(AuthLayer::new(vec![
            "valid-key-1".to_string(),
            "valid-key-2".to_string(),
        ]))
}

async fn status_for(app: Router, request: Request<Body>) -> StatusCode {
    app.oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn test_auth_with_valid_bearer_token() {
    let request = Request::builder()
        .uri("/test")
        .header(AUTHORIZATION, "Bearer valid-key-1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_for(create_test_app(), request).await, StatusCode::OK);
}

#[tokio::test]
async fn test_auth_with_bare_authorization_value() {
    let request = Request::builder()
        .uri("/test")
        .header(AUTHORIZATION, "valid-key-2")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_for(create_test_app(), request).await, StatusCode::OK);
}

#[tokio::test]
async fn test_auth_with_api_key_header() {
    let request = Request::builder()
        .uri("/test")
        .header(API_KEY_HEADER, "valid-key-1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_for(create_test_app(), request).await, StatusCode::OK);
}

#[tokio::test]
async fn test_auth_with_invalid_key() {
    let request = Request::builder()
        .uri("/test")
        .header(AUTHORIZATION, "Bearer invalid-key")
        .body(Body::empty())
        .unwrap();
    let response = create_test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "invalid_api_key");
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn test_auth_without_header() {
    let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
    assert_eq!(status_for(create_test_app(), request).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_health_endpoint_bypass() {
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    assert_eq!(status_for(create_test_app(), request).await, StatusCode::OK);
}

#[tokio::test]
async fn test_auth_empty_keys_allows_all() {
    let app = Router::new()
        .route("/test", get(|| async { "OK" }))
        .layer(AuthLayer::new(vec![" ".to_string()]));

    let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
    assert_eq!(status_for(app, request).await, StatusCode::OK);
}
