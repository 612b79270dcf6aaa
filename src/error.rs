//! Common error types for the task dispatcher

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
///
/// Errors raised before a task is enqueued (validation, capacity, shutdown)
/// are returned to the caller. Everything raised afterwards is recorded on the
/// task as its error message and never crosses the async boundary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Task queue is full: {0}")]
    Capacity(String),

    #[error("Provider refused to generate: {0}")]
    ProviderContent(String),

    #[error("Provider request failed: {0}")]
    ProviderProtocol(String),

    #[error("Generation timed out: {0}")]
    Timeout(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Shutting down: {0}")]
    Shutdown(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task is still in flight: {0}")]
    TaskInFlight(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => "server_error",
            AppError::Json(_) | AppError::Validation { .. } => "invalid_request_error",
            AppError::Capacity(_) => "capacity_error",
            AppError::ProviderContent(_) => "provider_content_error",
            AppError::ProviderProtocol(_) => "provider_protocol_error",
            AppError::Timeout(_) => "timeout_error",
            AppError::Persistence(_) => "persistence_error",
            AppError::Shutdown(_) => "shutdown_error",
            AppError::TaskNotFound(_) => "not_found_error",
            AppError::TaskInFlight(_) => "conflict_error",
            AppError::AuthenticationFailed(_) => "authentication_error",
        }
    }
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            AppError::Json(_) => (StatusCode::BAD_REQUEST, Some("invalid_json".to_string())),
            AppError::Validation { field, .. } => {
                (StatusCode::BAD_REQUEST, Some(format!("invalid_{}", field)))
            }
            AppError::Capacity(_) => (StatusCode::SERVICE_UNAVAILABLE, Some("queue_full".to_string())),
            AppError::Shutdown(_) => (StatusCode::SERVICE_UNAVAILABLE, Some("shutting_down".to_string())),
            AppError::ProviderContent(_) | AppError::ProviderProtocol(_) => (StatusCode::BAD_GATEWAY, None),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, None),
            AppError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            AppError::TaskNotFound(_) => (StatusCode::NOT_FOUND, Some("task_not_found".to_string())),
            AppError::TaskInFlight(_) => (StatusCode::CONFLICT, Some("task_in_flight".to_string())),
            AppError::AuthenticationFailed(_) => {
                (StatusCode::UNAUTHORIZED, Some("invalid_api_key".to_string()))
            }
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.kind().to_string(),
                code,
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
