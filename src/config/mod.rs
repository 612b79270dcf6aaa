//! Configuration loading

pub mod settings;

pub use settings::{
    AuthConfig, LimitsConfig, LoggingConfig, PoolConfig, ProviderConfig, ServerConfig, Settings,
    StorageConfig,
};
