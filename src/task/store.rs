//! Task persistence

use dashmap::DashMap;

use crate::error::{AppError, Result};
use crate::task::model::Task;

/// Persistence collaborator for task records
///
/// Readers always get a full snapshot; `update` applies its closure while
/// holding the record, so no partially applied state is ever observable.
pub trait TaskStore: Send + Sync {
    fn insert(&self, task: Task) -> Result<()>;

    fn get(&self, task_id: &str) -> Option<Task>;

    fn update(&self, task_id: &str, apply: &mut dyn FnMut(&mut Task)) -> Result<Task>;

    fn remove(&self, task_id: &str) -> Option<Task>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory task store backed by a concurrent map
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, Task>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn insert(&self, task: Task) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.tasks.entry(task.id.clone()) {
            Entry::Occupied(_) => Err(AppError::Persistence(format!(
                "task {} already exists",
                task.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(task);
                Ok(())
            }
        }
    }

    fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }

    fn update(&self, task_id: &str, apply: &mut dyn FnMut(&mut Task)) -> Result<Task> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::Persistence(format!("task {} no longer exists", task_id)))?;
        apply(entry.value_mut());
        Ok(entry.value().clone())
    }

    fn remove(&self, task_id: &str) -> Option<Task> {
        self.tasks.remove(task_id).map(|(_, task)| task)
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}
