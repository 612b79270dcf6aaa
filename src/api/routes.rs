//! API route definitions

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::api::handlers;
use crate::middleware::AuthLayer;
use crate::AppState;

/// Room for the JSON envelope around the base64 reference images
const BODY_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let limits = &state.settings.limits;
    // base64 inflates each reference image by 4/3
    let body_limit = limits
        .max_reference_images
        .saturating_mul(limits.max_reference_image_bytes)
        .saturating_mul(4)
        / 3
        + BODY_OVERHEAD_BYTES;

    let mut v1 = Router::new()
        .route("/tasks", post(handlers::submit_task))
        .route(
            "/tasks/:task_id",
            get(handlers::get_task).delete(handlers::delete_task),
        )
        .route("/tasks/:task_id/stream", get(handlers::stream_task))
        .layer(DefaultBodyLimit::max(body_limit));

    if state.settings.auth.enabled {
        v1 = v1.route_layer(AuthLayer::new(state.settings.auth.api_keys.clone()));
    }

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/v1", v1)
        .nest_service("/images", ServeDir::new(&state.settings.storage.base_path))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
