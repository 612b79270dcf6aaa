//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How often a task stream re-reads the task
    #[serde(default = "default_stream_poll_interval")]
    pub stream_poll_interval_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_stream_poll_interval() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stream_poll_interval_ms: default_stream_poll_interval(),
        }
    }
}

impl ServerConfig {
    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_interval_ms.max(1))
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Storage configuration for generated images
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub base_path: String,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

fn default_storage_path() -> String {
    "./generated_images".to_string()
}

fn default_url_prefix() -> String {
    "http://localhost:8080/images".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_path(),
            url_prefix: default_url_prefix(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Worker pool sizing and shutdown behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum number of queued tasks. Zero rejects every submission.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Ignore `queue_capacity` and accept any number of queued tasks
    #[serde(default)]
    pub unbounded_queue: bool,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_workers() -> usize {
    6
}

fn default_queue_capacity() -> usize {
    100
}

fn default_shutdown_grace() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            unbounded_queue: false,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl PoolConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Limits applied to incoming generation requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_reference_images")]
    pub max_reference_images: usize,
    #[serde(default = "default_max_reference_image_bytes")]
    pub max_reference_image_bytes: usize,
}

fn default_max_reference_images() -> usize {
    10
}

fn default_max_reference_image_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_reference_images: default_max_reference_images(),
            max_reference_image_bytes: default_max_reference_image_bytes(),
        }
    }
}

/// Provider configuration
///
/// Read once when the adapter is constructed. A configuration change means
/// building a new registry.
#[derive(Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Adapter kind ("gemini", "openai"). Defaults to `name`.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Default model for image generation
    #[serde(default)]
    pub image_model: Option<String>,
    /// Fallback model when no image-specific default is set
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: String,
    /// Open a fresh connection for every request
    #[serde(default)]
    pub disable_keep_alive: bool,
    /// Largest image body downloaded from a vendor-returned URL
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_provider_timeout() -> u64 {
    150
}

fn default_max_download_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_safety_threshold() -> String {
    "BLOCK_NONE".to_string()
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            api_key: String::new(),
            api_base: None,
            timeout_secs: default_provider_timeout(),
            image_model: None,
            default_model: None,
            safety_threshold: default_safety_threshold(),
            disable_keep_alive: false,
            max_download_bytes: default_max_download_bytes(),
            enabled: true,
        }
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("image_model", &self.image_model)
            .field("default_model", &self.default_model)
            .field("safety_threshold", &self.safety_threshold)
            .field("disable_keep_alive", &self.disable_keep_alive)
            .field("max_download_bytes", &self.max_download_bytes)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("pool.workers", 6)?
            .set_default("pool.queue_capacity", 100)?
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with IMG_DISPATCH_)
            .add_source(
                Environment::with_prefix("IMG_DISPATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "Server port cannot be 0".to_string(),
            )));
        }

        if self.pool.workers == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "Worker pool needs at least one worker".to_string(),
            )));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(AppError::Config(config::ConfigError::Message(
                    "Provider name cannot be empty".to_string(),
                )));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(AppError::Config(config::ConfigError::Message(format!(
                    "Provider '{}' is configured more than once",
                    provider.name
                ))));
            }
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            pool: PoolConfig::default(),
            limits: LimitsConfig::default(),
            providers: vec![],
        }
    }
}
