//! Folds a worker's generation outcome back into the task record

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::storage::StoredImage;
use crate::task::model::{Image, Task, TaskStatus};
use crate::task::store::TaskStore;

/// What a worker learned while processing one task
#[derive(Debug, Default)]
pub struct GenerationOutcome {
    /// Images that were generated and stored, in response order
    pub images: Vec<StoredImage>,
    /// Images lost after generation (e.g. storage failures)
    pub shortfall: Option<String>,
    /// Error that ended generation early
    pub error: Option<AppError>,
}

impl GenerationOutcome {
    pub fn failed(error: AppError) -> Self {
        Self {
            images: Vec::new(),
            shortfall: None,
            error: Some(error),
        }
    }

    pub fn produced(images: Vec<StoredImage>) -> Self {
        Self {
            images,
            shortfall: None,
            error: None,
        }
    }

    pub fn with_shortfall(mut self, shortfall: impl Into<String>) -> Self {
        self.shortfall = Some(shortfall.into());
        self
    }
}

/// Single writer for task state transitions after enqueue
#[derive(Clone)]
pub struct StatusReconciler {
    store: Arc<dyn TaskStore>,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Claim a pending task for processing
    pub fn mark_processing(&self, task_id: &str) -> Result<Task> {
        let mut claimed = false;
        let task = self.store.update(task_id, &mut |task| {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Processing;
                task.touch();
                claimed = true;
            }
        })?;

        if !claimed {
            return Err(AppError::Persistence(format!(
                "task {} is {} and cannot be claimed",
                task_id, task.status
            )));
        }
        Ok(task)
    }

    /// Record a fatal error for a task that produced nothing
    pub fn fail(&self, task_id: &str, error: AppError) -> Result<Task> {
        self.reconcile(task_id, GenerationOutcome::failed(error))
    }

    /// Apply the outcome and write the terminal status in one store update
    pub fn reconcile(&self, task_id: &str, outcome: GenerationOutcome) -> Result<Task> {
        let GenerationOutcome {
            mut images,
            shortfall,
            error,
        } = outcome;

        let mut already_terminal = None;
        let task = self.store.update(task_id, &mut |task| {
            if task.status.is_terminal() {
                already_terminal = Some(task.status);
                return;
            }

            let total = task.total_count as usize;
            if images.len() > total {
                debug!(
                    task_id = %task.id,
                    produced = images.len(),
                    requested = total,
                    "Discarding images beyond the requested count"
                );
                images.truncate(total);
            }

            let records: Vec<Image> = images
                .drain(..)
                .map(|stored| Image::new(&task.id, stored))
                .collect();
            let completed = records.len() as u32;

            let (fatal, message) = if completed == 0 {
                let message = match (&error, &shortfall) {
                    (Some(err), _) => err.to_string(),
                    (None, Some(shortfall)) => shortfall.clone(),
                    (None, None) => "no images produced".to_string(),
                };
                (true, Some(message))
            } else if completed < task.total_count {
                let message = shortfall
                    .clone()
                    .or_else(|| error.as_ref().map(|err| err.to_string()));
                (false, message)
            } else {
                (false, None)
            };

            task.images.extend(records);
            task.completed_count = task.images.len() as u32;
            task.status = TaskStatus::resolve(task.completed_count, task.total_count, fatal);
            task.error_message = message;
            task.touch();
            task.completed_at = Some(Utc::now());
        })?;

        if let Some(status) = already_terminal {
            warn!(task_id = %task_id, status = %status, "Task already reached a terminal status");
            return Err(AppError::Persistence(format!(
                "task {} is already {}",
                task_id, status
            )));
        }

        Ok(task)
    }
}
