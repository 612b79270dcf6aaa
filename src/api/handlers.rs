//! HTTP request handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::types::{HealthResponse, SubmitTaskRequest};
use crate::error::{AppError, Result};
use crate::task::{Task, TaskHandle, TaskStatus, TaskStore};
use crate::AppState;

const STREAM_KEEP_ALIVE: Duration = Duration::from_secs(3);

/// POST /v1/tasks
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskHandle>)> {
    let Json(body) = payload.map_err(|rejection| AppError::validation("body", rejection.body_text()))?;

    let submission = body.into_submission(state.settings.limits.max_reference_images)?;
    let handle = state.gate.submit(
        submission.params,
        &submission.provider,
        submission.model_hint.as_deref(),
    )?;

    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// GET /v1/tasks/:task_id
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>> {
    Ok(Json(state.gate.status(&task_id)?))
}

/// Fields whose change is worth a new stream event
#[derive(PartialEq)]
struct TaskSignature {
    status: TaskStatus,
    completed_count: u32,
    images: usize,
    error_message: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl TaskSignature {
    fn of(task: &Task) -> Self {
        Self {
            status: task.status,
            completed_count: task.completed_count,
            images: task.images.len(),
            error_message: task.error_message.clone(),
            completed_at: task.completed_at,
        }
    }
}

struct TaskWatch {
    store: Arc<dyn TaskStore>,
    task_id: String,
    next: Option<Task>,
    last: Option<TaskSignature>,
    ticker: Interval,
    finished: bool,
}

impl TaskWatch {
    /// Next snapshot that differs from the last one sent, or `None` once the
    /// task is terminal or gone.
    async fn next_change(&mut self) -> Option<Task> {
        loop {
            if self.finished {
                return None;
            }

            let task = match self.next.take() {
                Some(task) => task,
                None => {
                    self.ticker.tick().await;
                    self.store.get(&self.task_id)?
                }
            };

            self.finished = task.status.is_terminal();
            let signature = TaskSignature::of(&task);
            if self.last.as_ref() != Some(&signature) {
                self.last = Some(signature);
                return Some(task);
            }
        }
    }
}

/// GET /v1/tasks/:task_id/stream
///
/// Server-sent snapshots of the task, one per change, closing after the
/// terminal snapshot.
pub async fn stream_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let task = state.gate.status(&task_id)?;
    debug!(task_id = %task_id, status = %task.status, "Streaming task updates");

    let mut ticker = tokio::time::interval(state.settings.server.stream_poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let watch = TaskWatch {
        store: state.store.clone(),
        task_id,
        next: Some(task),
        last: None,
        ticker,
        finished: false,
    };

    let events = stream::unfold(watch, |mut watch| async move {
        let task = watch.next_change().await?;
        Some((Event::default().json_data(&task), watch))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(STREAM_KEEP_ALIVE).text("ping")))
}

/// DELETE /v1/tasks/:task_id
///
/// Only terminal tasks can be deleted; their images go with them.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode> {
    let task = state.gate.status(&task_id)?;
    if !task.status.is_terminal() {
        return Err(AppError::TaskInFlight(format!(
            "task {} is {}",
            task_id, task.status
        )));
    }

    let removed = state
        .store
        .remove(&task_id)
        .ok_or_else(|| AppError::TaskNotFound(task_id.clone()))?;

    for image in &removed.images {
        if let Err(e) = state.storage.delete(&image.path).await {
            warn!(task_id = %task_id, path = %image.path, error = %e, "Failed to delete image");
        }
    }

    info!(task_id = %task_id, images = removed.images.len(), "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pool = state.pool.stats();
    Json(HealthResponse {
        status: if pool.accepting { "ok" } else { "draining" },
        version: env!("CARGO_PKG_VERSION"),
        pool,
        providers: state.registry.names(),
    })
}
