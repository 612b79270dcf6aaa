//! Asynchronous image generation task dispatcher
//!
//! Requests are validated and accepted synchronously, then executed by a
//! bounded worker pool against pluggable generation providers. Progress,
//! partial results and failures are recorded on each task for polling.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod provider;
pub mod queue;
pub mod storage;
pub mod task;

pub use error::{AppError, Result};

use std::sync::Arc;

use crate::config::Settings;
use crate::provider::ProviderRegistry;
use crate::queue::{SubmissionGate, WorkerPool};
use crate::storage::ImageStorage;
use crate::task::TaskStore;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ProviderRegistry>,
    pub store: Arc<dyn TaskStore>,
    pub storage: Arc<dyn ImageStorage>,
    pub pool: Arc<WorkerPool>,
    pub gate: SubmissionGate,
}

impl AppState {
    /// Wire the components together and start the worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        settings: Settings,
        registry: ProviderRegistry,
        store: Arc<dyn TaskStore>,
        storage: Arc<dyn ImageStorage>,
    ) -> Self {
        let settings = Arc::new(settings);
        let registry = Arc::new(registry);
        let pool = Arc::new(WorkerPool::start(
            &settings.pool,
            registry.clone(),
            store.clone(),
            storage.clone(),
        ));
        let gate = SubmissionGate::new(
            registry.clone(),
            store.clone(),
            pool.clone(),
            settings.limits.clone(),
        );

        Self {
            settings,
            registry,
            store,
            storage,
            pool,
            gate,
        }
    }
}
