//! Fixed-size worker pool draining one FIFO task queue

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::error::{AppError, Result};
use crate::provider::{GenerationRequest, ProviderRegistry};
use crate::storage::ImageStorage;
use crate::task::reconciler::{GenerationOutcome, StatusReconciler};
use crate::task::store::TaskStore;

/// A persisted task waiting for a worker
#[derive(Debug)]
pub struct QueuedTask {
    pub provider: String,
    pub request: GenerationRequest,
}

/// Queue depth limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    /// At most this many waiting tasks; zero rejects every submission
    Bounded(usize),
    Unbounded,
}

impl QueueCapacity {
    pub fn from_config(config: &PoolConfig) -> Self {
        if config.unbounded_queue {
            QueueCapacity::Unbounded
        } else {
            QueueCapacity::Bounded(config.queue_capacity)
        }
    }

    fn limit(&self) -> Option<usize> {
        match self {
            QueueCapacity::Bounded(limit) => Some(*limit),
            QueueCapacity::Unbounded => None,
        }
    }
}

enum QueueSender {
    Bounded(mpsc::Sender<QueuedTask>),
    Unbounded(mpsc::UnboundedSender<QueuedTask>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<QueuedTask>),
    Unbounded(mpsc::UnboundedReceiver<QueuedTask>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<QueuedTask> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

fn queue_channel(capacity: QueueCapacity) -> (QueueSender, QueueReceiver) {
    match capacity {
        QueueCapacity::Bounded(limit) => {
            // tokio rejects a zero-sized channel; a zero limit never reserves anyway
            let (tx, rx) = mpsc::channel(limit.max(1));
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
        QueueCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    }
}

#[derive(Default)]
struct PoolCounters {
    queued: AtomicU64,
    in_flight: AtomicU64,
    processed: AtomicU64,
}

/// Queue slot held between reservation and send
///
/// Dropping an unused slot releases it.
pub struct QueueSlot {
    inner: SlotInner,
    counters: Arc<PoolCounters>,
}

enum SlotInner {
    Bounded(mpsc::OwnedPermit<QueuedTask>),
    Unbounded(mpsc::UnboundedSender<QueuedTask>),
}

impl QueueSlot {
    /// Hand the task to the workers. Never waits.
    pub fn send(self, task: QueuedTask) -> Result<()> {
        // Count first so a fast worker never sees the counter below zero
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        match self.inner {
            SlotInner::Bounded(permit) => {
                permit.send(task);
                Ok(())
            }
            SlotInner::Unbounded(tx) => tx.send(task).map_err(|_| {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                AppError::Shutdown("worker pool stopped before the task was queued".to_string())
            }),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    /// `None` when the queue is unbounded
    pub queue_capacity: Option<usize>,
    pub queued: u64,
    pub in_flight: u64,
    pub processed: u64,
    pub accepting: bool,
}

/// W workers sharing one FIFO queue of capacity Q
pub struct WorkerPool {
    workers: usize,
    capacity: QueueCapacity,
    sender: RwLock<Option<QueueSender>>,
    counters: Arc<PoolCounters>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the workers on the current tokio runtime
    pub fn start(
        config: &PoolConfig,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn TaskStore>,
        storage: Arc<dyn ImageStorage>,
    ) -> Self {
        let workers = config.workers.max(1);
        let capacity = QueueCapacity::from_config(config);
        let (sender, receiver) = queue_channel(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(PoolCounters::default());
        let shutdown = CancellationToken::new();
        let reconciler = StatusReconciler::new(store);

        let handles = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    registry: registry.clone(),
                    storage: storage.clone(),
                    reconciler: reconciler.clone(),
                    counters: counters.clone(),
                    receiver: receiver.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers, capacity = ?capacity, "Worker pool started");

        Self {
            workers,
            capacity,
            sender: RwLock::new(Some(sender)),
            counters,
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Reserve a queue slot without waiting
    pub fn try_reserve(&self) -> Result<QueueSlot> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or_else(|| {
            AppError::Shutdown("worker pool is not accepting new tasks".to_string())
        })?;

        let inner = match sender {
            QueueSender::Bounded(_) if self.capacity == QueueCapacity::Bounded(0) => {
                return Err(AppError::Capacity("queue capacity is 0".to_string()));
            }
            QueueSender::Bounded(tx) => match tx.clone().try_reserve_owned() {
                Ok(permit) => SlotInner::Bounded(permit),
                Err(TrySendError::Full(_)) => {
                    return Err(AppError::Capacity(format!(
                        "{} tasks already waiting",
                        self.capacity.limit().unwrap_or_default()
                    )));
                }
                Err(TrySendError::Closed(_)) => {
                    return Err(AppError::Shutdown(
                        "worker pool is not accepting new tasks".to_string(),
                    ));
                }
            },
            QueueSender::Unbounded(tx) => SlotInner::Unbounded(tx.clone()),
        };

        Ok(QueueSlot {
            inner,
            counters: self.counters.clone(),
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            queue_capacity: self.capacity.limit(),
            queued: self.counters.queued.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            accepting: self.is_accepting(),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Stop accepting tasks and drain.
    ///
    /// Workers keep draining the queue for up to `grace`. After that every
    /// in-flight generation is cancelled and the cancelled or still queued
    /// tasks are failed with a shutdown error.
    pub async fn shutdown(&self, grace: Duration) {
        if self.sender.write().take().is_none() {
            debug!("Worker pool already shut down");
            return;
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        info!(
            grace_secs = grace.as_secs(),
            queued = self.counters.queued.load(Ordering::Relaxed),
            in_flight = self.counters.in_flight.load(Ordering::Relaxed),
            "Draining worker pool"
        );

        let joined = futures::future::join_all(handles);
        tokio::pin!(joined);

        let results = match tokio::time::timeout(grace, &mut joined).await {
            Ok(results) => results,
            Err(_) => {
                warn!("Drain deadline passed, cancelling in-flight tasks");
                self.shutdown.cancel();
                joined.await
            }
        };
        self.shutdown.cancel();

        for result in results {
            if let Err(e) = result {
                error!(error = %e, "Worker exited abnormally");
            }
        }
        info!(
            processed = self.counters.processed.load(Ordering::Relaxed),
            "Worker pool stopped"
        );
    }
}

struct Worker {
    id: usize,
    registry: Arc<ProviderRegistry>,
    storage: Arc<dyn ImageStorage>,
    reconciler: StatusReconciler,
    counters: Arc<PoolCounters>,
    receiver: Arc<tokio::sync::Mutex<QueueReceiver>>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");

        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(task) = next else {
                break;
            };
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);

            if self.shutdown.is_cancelled() {
                self.abandon(&task.request.task_id);
                continue;
            }

            self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
            let task_id = task.request.task_id.clone();

            let result = AssertUnwindSafe(self.process(task)).catch_unwind().await;
            if let Err(panic) = result {
                let message = panic_message(panic.as_ref());
                error!(worker = self.id, task_id = %task_id, panic = %message, "Task processing panicked");
                let error = AppError::Internal(format!("worker panicked: {}", message));
                if let Err(e) = self.reconciler.fail(&task_id, error) {
                    warn!(task_id = %task_id, error = %e, "Could not record panic on task");
                }
            }

            self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
        }

        debug!(worker = self.id, "Worker stopped");
    }

    fn abandon(&self, task_id: &str) {
        let error = AppError::Shutdown("task was still queued when the pool stopped".to_string());
        match self.reconciler.fail(task_id, error) {
            Ok(_) => info!(worker = self.id, task_id = %task_id, "Failed queued task on shutdown"),
            Err(e) => warn!(task_id = %task_id, error = %e, "Could not fail queued task"),
        }
    }

    async fn process(&self, task: QueuedTask) {
        let QueuedTask { provider, request } = task;

        if let Err(e) = self.reconciler.mark_processing(&request.task_id) {
            warn!(worker = self.id, task_id = %request.task_id, error = %e, "Skipping task");
            return;
        }

        debug!(
            worker = self.id,
            task_id = %request.task_id,
            provider = %provider,
            model = %request.model,
            "Processing task"
        );

        let outcome = self.generate(&provider, &request).await;

        match self.reconciler.reconcile(&request.task_id, outcome) {
            Ok(task) => info!(
                worker = self.id,
                task_id = %task.id,
                status = %task.status,
                completed = task.completed_count,
                total = task.total_count,
                "Task finished"
            ),
            Err(e) => error!(
                worker = self.id,
                task_id = %request.task_id,
                error = %e,
                "Failed to record task result"
            ),
        }
    }

    async fn generate(&self, provider_name: &str, request: &GenerationRequest) -> GenerationOutcome {
        let provider = match self.registry.require(provider_name) {
            Ok(provider) => provider,
            Err(e) => return GenerationOutcome::failed(e),
        };

        let deadline = provider.timeout();
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(AppError::Shutdown(
                "generation cancelled while the pool was stopping".to_string(),
            )),
            result = tokio::time::timeout(deadline, provider.generate(request)) => match result {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(format!(
                    "{} did not respond within {:?}",
                    provider.name(),
                    deadline
                ))),
            },
        };

        match result {
            Ok(output) => self.store_images(request, output.images).await,
            Err(e) => {
                warn!(
                    worker = self.id,
                    task_id = %request.task_id,
                    provider = %provider_name,
                    kind = e.kind(),
                    error = %e,
                    "Generation failed"
                );
                GenerationOutcome::failed(e)
            }
        }
    }

    /// Save each image; one failed write only loses that image
    async fn store_images(&self, request: &GenerationRequest, images: Vec<Vec<u8>>) -> GenerationOutcome {
        let requested = request.params.count as usize;
        if images.len() > requested {
            debug!(
                task_id = %request.task_id,
                produced = images.len(),
                requested,
                "Provider returned more images than requested"
            );
        }

        let mut stored = Vec::new();
        let mut failures = Vec::new();
        for (index, data) in images.iter().take(requested).enumerate() {
            match self.storage.save(&request.task_id, index, data).await {
                Ok(image) => stored.push(image),
                Err(e) => {
                    warn!(task_id = %request.task_id, index, error = %e, "Failed to store image");
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            return GenerationOutcome::produced(stored);
        }

        let attempted = stored.len() + failures.len();
        if stored.is_empty() {
            return GenerationOutcome::failed(AppError::Persistence(format!(
                "none of the {} images could be stored: {}",
                attempted,
                failures.join("; ")
            )));
        }

        let shortfall = format!(
            "{} of {} images could not be stored: {}",
            failures.len(),
            attempted,
            failures.join("; ")
        );
        GenerationOutcome::produced(stored).with_shortfall(shortfall)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
