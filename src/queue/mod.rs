//! Task queueing: submission gate and worker pool

pub mod gate;
pub mod worker_pool;

pub use gate::SubmissionGate;
pub use worker_pool::{PoolStats, QueueCapacity, QueueSlot, QueuedTask, WorkerPool};
