//! Provider adapter contract and shared HTTP plumbing

pub mod gemini;
pub mod media;
pub mod openai;
pub mod registry;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::task::params::GenerationParams;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use registry::{ProviderFactory, ProviderRegistry};

/// Everything an adapter needs to run one generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task_id: String,
    /// Already resolved through [`ImageProvider::resolve_model`]
    pub model: String,
    pub params: GenerationParams,
}

/// Vendor details kept for logging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub model: Option<String>,
    pub finish_reasons: Vec<String>,
    /// Text the vendor returned alongside the images
    pub text: Option<String>,
}

/// Normalized adapter result
#[derive(Debug, Clone, Default)]
pub struct ProviderOutput {
    /// Raw image bytes in response order
    pub images: Vec<Vec<u8>>,
    pub metadata: GenerationMetadata,
}

/// Capability contract every image generation vendor implements
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Registry name of this adapter instance
    fn name(&self) -> &str;

    /// Configuration the adapter was built from
    fn config(&self) -> &ProviderConfig;

    /// Pre-flight checks. Must not touch the network.
    fn validate_params(&self, params: &GenerationParams) -> Result<()>;

    /// Explicit hint, then the image model, then the provider default
    fn resolve_model(&self, hint: Option<&str>) -> Result<String> {
        resolve_model(self.config(), hint)
    }

    /// Deadline for a single `generate` call
    fn timeout(&self) -> Duration {
        self.config().timeout()
    }

    /// Run one generation call. Dropping the future cancels it.
    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderOutput>;
}

/// Model fallback chain shared by all adapters
pub fn resolve_model(config: &ProviderConfig, hint: Option<&str>) -> Result<String> {
    let candidates = [
        hint,
        config.image_model.as_deref(),
        config.default_model.as_deref(),
    ];

    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|model| !model.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::validation(
                "model",
                format!("no model requested and provider '{}' has no default", config.name),
            )
        })
}

/// HTTP client for one adapter instance
pub(crate) fn build_http_client(config: &ProviderConfig) -> Result<Client> {
    let mut builder = Client::builder().timeout(config.timeout());

    if config.disable_keep_alive {
        builder = builder.pool_max_idle_per_host(0).http1_only();
    }

    builder
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Classify a transport failure from reqwest
pub(crate) fn transport_error(provider: &str, error: reqwest::Error) -> AppError {
    if error.is_timeout() {
        AppError::Timeout(format!("{} request timed out: {}", provider, error))
    } else if error.is_decode() {
        AppError::ProviderProtocol(format!("{} returned an undecodable body: {}", provider, error))
    } else {
        AppError::ProviderProtocol(format!("{} request failed: {}", provider, error))
    }
}

/// Error for a non-2xx vendor response, keeping the vendor message
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> AppError {
    #[derive(Deserialize)]
    struct Envelope {
        error: Detail,
    }

    #[derive(Deserialize)]
    struct Detail {
        message: String,
    }

    let message = serde_json::from_str::<Envelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| truncate(body.trim(), 512));

    AppError::ProviderProtocol(format!("{} returned {}: {}", provider, status, message))
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
