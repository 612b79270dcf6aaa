//! Task and image records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::storage::StoredImage;
use crate::task::params::{AspectRatio, GenerationParams, ResolutionTier};

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Partial,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Status implied by a generation outcome.
    ///
    /// The reconciler only sets `fatal` when nothing was produced. Any other
    /// caller that passes `fatal` alongside images gets `Partial`, even when
    /// every requested image arrived (`resolve(n, n, true)`). A fatal error
    /// never reports `Completed`.
    pub fn resolve(completed: u32, total: u32, fatal: bool) -> TaskStatus {
        if completed == 0 {
            return if fatal {
                TaskStatus::Failed
            } else {
                TaskStatus::Processing
            };
        }

        if completed < total || fatal {
            TaskStatus::Partial
        } else {
            TaskStatus::Completed
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Partial | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Partial => "partial",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation settings recorded at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSettings {
    pub aspect_ratio: AspectRatio,
    pub resolution: ResolutionTier,
    pub reference_images: usize,
}

impl From<&GenerationParams> for TaskSettings {
    fn from(params: &GenerationParams) -> Self {
        Self {
            aspect_ratio: params.aspect_ratio,
            resolution: params.resolution,
            reference_images: params.reference_images.len(),
        }
    }
}

/// A generated image owned by exactly one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub task_id: String,
    pub path: String,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Image {
    pub fn new(task_id: &str, stored: StoredImage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            path: stored.path,
            url: stored.url,
            width: stored.width,
            height: stored.height,
            created_at: Utc::now(),
        }
    }
}

/// One submitted generation request and its progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    pub provider: String,
    pub model: String,
    pub total_count: u32,
    pub completed_count: u32,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub settings: TaskSettings,
    pub images: Vec<Image>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// New pending task for validated parameters
    pub fn new(params: &GenerationParams, provider: &str, model: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: params.prompt.clone(),
            provider: provider.to_string(),
            model: model.to_string(),
            total_count: params.count,
            completed_count: 0,
            status: TaskStatus::Pending,
            error_message: None,
            settings: TaskSettings::from(params),
            images: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Returned to the caller when a task is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub status: TaskStatus,
}

impl From<&Task> for TaskHandle {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
        }
    }
}
