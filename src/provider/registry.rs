//! Explicit table of provider adapters, built once at startup

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ProviderConfig, Settings};
use crate::error::{AppError, Result};
use crate::provider::{GeminiProvider, ImageProvider, OpenAiProvider};

/// Builds an adapter from its configuration
pub type ProviderFactory = fn(&ProviderConfig) -> Result<Arc<dyn ImageProvider>>;

/// Named adapter instances, shared by the gate and the worker pool
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
    providers: HashMap<String, Arc<dyn ImageProvider>>,
}

impl ProviderRegistry {
    /// Empty registry with no factories
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that knows the built-in adapter kinds
    pub fn with_default_factories() -> Self {
        let mut registry = Self::new();
        registry.register_factory("gemini", GeminiProvider::factory);
        registry.register_factory("openai", OpenAiProvider::factory);
        registry
    }

    /// Build every enabled provider listed in the settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut registry = Self::with_default_factories();
        registry.build_from_config(&settings.providers)?;
        Ok(registry)
    }

    pub fn register_factory(&mut self, kind: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Add a ready-made adapter, replacing any with the same name
    pub fn register(&mut self, provider: Arc<dyn ImageProvider>) {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_some() {
            debug!(provider = %name, "Replaced registered provider");
        }
    }

    pub fn build_from_config(&mut self, configs: &[ProviderConfig]) -> Result<()> {
        for provider_config in configs {
            if !provider_config.enabled {
                debug!(provider = %provider_config.name, "Skipping disabled provider");
                continue;
            }

            let kind = provider_config.kind();
            let factory = self.factories.get(kind).copied().ok_or_else(|| {
                AppError::Config(config::ConfigError::Message(format!(
                    "Provider '{}' has unknown kind '{}'",
                    provider_config.name, kind
                )))
            })?;

            let provider = factory(provider_config)?;
            info!(provider = %provider_config.name, kind = %kind, "Registered provider");
            self.register(provider);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    /// Like `get`, but an unknown name is a validation error on `provider`
    pub fn require(&self, name: &str) -> Result<Arc<dyn ImageProvider>> {
        self.get(name).ok_or_else(|| {
            AppError::validation("provider", format!("unknown provider '{}'", name))
        })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
