//! Functional tests for the submission gate and worker pool

use gen_task_dispatcher::provider::ImageProvider;
use gen_task_dispatcher::task::{GenerationParams, TaskStatus};
use gen_task_dispatcher::AppError;
use std::sync::Arc;
use std::time::Duration;

use super::support::{
    build_state, pool_config, unbounded_pool, wait_for_status, wait_for_terminal, Behavior,
    MemoryStorage, MockProvider,
};

fn providers(list: Vec<Arc<MockProvider>>) -> Vec<Arc<dyn ImageProvider>> {
    list.into_iter().map(|p| p as Arc<dyn ImageProvider>).collect()
}

#[tokio::test]
async fn test_task_completes_with_all_images() {
    let provider = Arc::new(MockProvider::new("mock", Behavior::Return(3)));
    let storage = Arc::new(MemoryStorage::default());
    let state = build_state(providers(vec![provider.clone()]), storage.clone(), pool_config(2, 10));

    let handle = state
        .gate
        .submit(GenerationParams::new("three cats").with_count(3), "mock", None)
        .unwrap();
    assert_eq!(handle.status, TaskStatus::Pending);

    let task = wait_for_terminal(&state, &handle.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completed_count, 3);
    assert_eq!(task.images.len(), 3);
    assert!(task.error_message.is_none());
    assert!(task.completed_at.is_some());
    assert_eq!(task.model, "mock-model");
    assert_eq!(storage.saved(), 3);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_provider_error_fails_task_with_message() {
    let provider = Arc::new(MockProvider::new(
        "mock",
        Behavior::Fail("connection refused".to_string()),
    ));
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 10),
    );

    let handle = state.gate.submit(GenerationParams::new("x"), "mock", None).unwrap();
    let task = wait_for_terminal(&state, &handle.task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.completed_count, 0);
    assert!(task.error_message.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_fewer_images_than_requested_is_partial() {
    let provider = Arc::new(MockProvider::new("mock", Behavior::Return(2)));
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 10),
    );

    let handle = state
        .gate
        .submit(GenerationParams::new("x").with_count(4), "mock", None)
        .unwrap();
    let task = wait_for_terminal(&state, &handle.task_id).await;

    assert_eq!(task.status, TaskStatus::Partial);
    assert_eq!(task.completed_count, 2);
    assert_eq!(task.total_count, 4);
    assert!(task.error_message.is_none());
}

#[tokio::test]
async fn test_extra_images_are_discarded() {
    let provider = Arc::new(MockProvider::new("mock", Behavior::Return(5)));
    let storage = Arc::new(MemoryStorage::default());
    let state = build_state(providers(vec![provider]), storage.clone(), pool_config(1, 10));

    let handle = state
        .gate
        .submit(GenerationParams::new("x").with_count(2), "mock", None)
        .unwrap();
    let task = wait_for_terminal(&state, &handle.task_id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completed_count, 2);
    assert_eq!(storage.saved(), 2);
}

#[tokio::test]
async fn test_zero_images_fails_task() {
    let provider = Arc::new(MockProvider::new("mock", Behavior::Return(0)));
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 10),
    );

    let handle = state.gate.submit(GenerationParams::new("x"), "mock", None).unwrap();
    let task = wait_for_terminal(&state, &handle.task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.is_some());
}

#[tokio::test]
async fn test_zero_capacity_rejects_without_record() {
    let provider = Arc::new(MockProvider::new("mock", Behavior::Return(1)));
    let state = build_state(
        providers(vec![provider.clone()]),
        Arc::new(MemoryStorage::default()),
        pool_config(2, 0),
    );

    let err = state.gate.submit(GenerationParams::new("x"), "mock", None).unwrap_err();
    assert!(matches!(err, AppError::Capacity(_)));
    assert!(state.store.is_empty());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_full_queue_rejects_immediately() {
    let provider = Arc::new(MockProvider::new(
        "mock",
        Behavior::Sleep(Duration::from_millis(300), 1),
    ));
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 1),
    );

    let first = state.gate.submit(GenerationParams::new("a"), "mock", None).unwrap();
    wait_for_status(&state, &first.task_id, |s| s == TaskStatus::Processing).await;

    let second = state.gate.submit(GenerationParams::new("b"), "mock", None).unwrap();

    let started = std::time::Instant::now();
    let err = state.gate.submit(GenerationParams::new("c"), "mock", None).unwrap_err();
    assert!(matches!(err, AppError::Capacity(_)));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(state.store.len(), 2);

    let first = wait_for_terminal(&state, &first.task_id).await;
    let second = wait_for_terminal(&state, &second.task_id).await;
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(second.status, TaskStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_worker_count() {
    let provider = Arc::new(MockProvider::new(
        "mock",
        Behavior::Sleep(Duration::from_millis(150), 1),
    ));
    let state = build_state(
        providers(vec![provider.clone()]),
        Arc::new(MemoryStorage::default()),
        unbounded_pool(2),
    );

    let ids: Vec<String> = (0..3)
        .map(|i| {
            state
                .gate
                .submit(GenerationParams::new(format!("task {}", i)), "mock", None)
                .unwrap()
                .task_id
        })
        .collect();

    let mut max_processing = 0;
    loop {
        let tasks: Vec<_> = ids.iter().map(|id| state.gate.status(id).unwrap()).collect();
        let processing = tasks.iter().filter(|t| t.status == TaskStatus::Processing).count();
        max_processing = max_processing.max(processing);
        if tasks.iter().all(|t| t.status.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(max_processing <= 2);
    assert_eq!(provider.peak(), 2);
    for id in &ids {
        assert_eq!(state.gate.status(id).unwrap().status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn test_provider_timeout_fails_task() {
    let provider = Arc::new(
        MockProvider::new("mock", Behavior::Sleep(Duration::from_secs(5), 1))
            .with_timeout(Duration::from_millis(50)),
    );
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 10),
    );

    let handle = state.gate.submit(GenerationParams::new("x"), "mock", None).unwrap();
    let task = wait_for_terminal(&state, &handle.task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    let message = task.error_message.unwrap();
    assert!(message.contains("timed out"), "{}", message);
    assert!(message.contains("did not respond"), "{}", message);
}

#[tokio::test]
async fn test_panicking_provider_does_not_kill_worker() {
    let panicky = Arc::new(MockProvider::new("panicky", Behavior::Panic));
    let healthy = Arc::new(MockProvider::new("mock", Behavior::Return(1)));
    let state = build_state(
        providers(vec![panicky, healthy]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 10),
    );

    let crashed = state.gate.submit(GenerationParams::new("x"), "panicky", None).unwrap();
    let task = wait_for_terminal(&state, &crashed.task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("mock provider exploded"));

    // Same single worker picks up the next task
    let next = state.gate.submit(GenerationParams::new("y"), "mock", None).unwrap();
    let task = wait_for_terminal(&state, &next.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_storage_failure_is_a_shortfall() {
    let provider = Arc::new(MockProvider::new("mock", Behavior::Return(3)));
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::failing(&[1])),
        pool_config(1, 10),
    );

    let handle = state
        .gate
        .submit(GenerationParams::new("x").with_count(3), "mock", None)
        .unwrap();
    let task = wait_for_terminal(&state, &handle.task_id).await;

    assert_eq!(task.status, TaskStatus::Partial);
    assert_eq!(task.completed_count, 2);
    assert!(task.error_message.unwrap().contains("could not be stored"));
}

#[tokio::test]
async fn test_all_storage_failures_fail_task() {
    let provider = Arc::new(MockProvider::new("mock", Behavior::Return(2)));
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::failing(&[0, 1])),
        pool_config(1, 10),
    );

    let handle = state
        .gate
        .submit(GenerationParams::new("x").with_count(2), "mock", None)
        .unwrap();
    let task = wait_for_terminal(&state, &handle.task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("Persistence error"));
}

#[tokio::test]
async fn test_rejected_submissions_leave_no_record() {
    let provider = Arc::new(MockProvider::new("mock", Behavior::Return(1)).without_default_model());
    let state = build_state(
        providers(vec![provider.clone()]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 10),
    );

    let err = state.gate.submit(GenerationParams::new("x"), "nope", None).unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "provider", .. }));

    let err = state.gate.submit(GenerationParams::new("x"), "mock", None).unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "model", .. }));

    let err = state
        .gate
        .submit(GenerationParams::new("x").with_count(0), "mock", Some("m"))
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "count", .. }));

    assert!(state.store.is_empty());

    let handle = state
        .gate
        .submit(GenerationParams::new("x"), "mock", Some("explicit-model"))
        .unwrap();
    let task = wait_for_terminal(&state, &handle.task_id).await;
    assert_eq!(task.model, "explicit-model");
}

#[tokio::test]
async fn test_shutdown_fails_in_flight_and_queued_tasks() {
    let provider = Arc::new(MockProvider::new(
        "mock",
        Behavior::Sleep(Duration::from_secs(5), 1),
    ));
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 10),
    );

    let running = state.gate.submit(GenerationParams::new("a"), "mock", None).unwrap();
    wait_for_status(&state, &running.task_id, |s| s == TaskStatus::Processing).await;
    let queued = state.gate.submit(GenerationParams::new("b"), "mock", None).unwrap();

    state.pool.shutdown(Duration::from_millis(50)).await;

    for id in [&running.task_id, &queued.task_id] {
        let task = state.gate.status(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().starts_with("Shutting down"));
    }

    let err = state.gate.submit(GenerationParams::new("c"), "mock", None).unwrap_err();
    assert!(matches!(err, AppError::Shutdown(_)));
    assert!(!state.pool.is_accepting());
}

#[tokio::test]
async fn test_shutdown_drains_within_grace() {
    let provider = Arc::new(MockProvider::new(
        "mock",
        Behavior::Sleep(Duration::from_millis(50), 1),
    ));
    let state = build_state(
        providers(vec![provider]),
        Arc::new(MemoryStorage::default()),
        pool_config(1, 10),
    );

    let ids: Vec<String> = (0..3)
        .map(|_| state.gate.submit(GenerationParams::new("x"), "mock", None).unwrap().task_id)
        .collect();

    state.pool.shutdown(Duration::from_secs(5)).await;

    for id in &ids {
        assert_eq!(state.gate.status(id).unwrap().status, TaskStatus::Completed);
    }
    let stats = state.pool.stats();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.in_flight, 0);
}
