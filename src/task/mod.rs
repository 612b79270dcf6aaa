//! Task records, typed parameters and status reconciliation

pub mod model;
pub mod params;
pub mod reconciler;
pub mod store;

pub use model::{Image, Task, TaskHandle, TaskSettings, TaskStatus};
pub use params::{
    AspectRatio, GenerationMode, GenerationParams, ReferenceImage, ResolutionTier,
    MAX_IMAGES_PER_TASK,
};
pub use reconciler::{GenerationOutcome, StatusReconciler};
pub use store::{MemoryTaskStore, TaskStore};
