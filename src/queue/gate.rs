//! Submission gate: validate, persist and enqueue without waiting

use std::sync::Arc;
use tracing::info;

use crate::config::LimitsConfig;
use crate::error::{AppError, Result};
use crate::provider::{GenerationRequest, ProviderRegistry};
use crate::queue::worker_pool::{QueuedTask, WorkerPool};
use crate::task::model::{Task, TaskHandle};
use crate::task::params::GenerationParams;
use crate::task::store::TaskStore;

/// Entry point for new generation requests
pub struct SubmissionGate {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn TaskStore>,
    pool: Arc<WorkerPool>,
    limits: LimitsConfig,
}

impl SubmissionGate {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn TaskStore>,
        pool: Arc<WorkerPool>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            registry,
            store,
            pool,
            limits,
        }
    }

    /// Accept or reject a request synchronously.
    ///
    /// Nothing is persisted unless every check passes and a queue slot was
    /// reserved, so a rejected call never leaves a task record behind.
    pub fn submit(
        &self,
        params: GenerationParams,
        provider_name: &str,
        model_hint: Option<&str>,
    ) -> Result<TaskHandle> {
        params.validate(&self.limits)?;

        let provider = self.registry.require(provider_name)?;
        provider.validate_params(&params)?;
        let model = provider.resolve_model(model_hint)?;

        let slot = self.pool.try_reserve()?;

        let task = Task::new(&params, provider.name(), &model);
        let handle = TaskHandle::from(&task);
        self.store.insert(task)?;

        let queued = QueuedTask {
            provider: provider.name().to_string(),
            request: GenerationRequest {
                task_id: handle.task_id.clone(),
                model: model.clone(),
                params,
            },
        };

        if let Err(e) = slot.send(queued) {
            self.store.remove(&handle.task_id);
            return Err(e);
        }

        info!(
            task_id = %handle.task_id,
            provider = %provider.name(),
            model = %model,
            "Task accepted"
        );

        Ok(handle)
    }

    /// Current snapshot of a task
    pub fn status(&self, task_id: &str) -> Result<Task> {
        self.store
            .get(task_id)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
    }
}
