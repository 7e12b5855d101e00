//! In-memory task store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parklens_models::{Task, TaskId, TaskState};

use crate::error::{TaskStoreError, TaskStoreResult};
use crate::store::TaskStore;

/// Task records held in a sharded concurrent map.
///
/// Each transition replaces the record's state while holding its shard lock,
/// so readers of one task never wait on writers of another.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, task: Task) -> TaskStoreResult<()> {
        match self.tasks.entry(task.id.clone()) {
            Entry::Occupied(_) => Err(TaskStoreError::Duplicate(task.id)),
            Entry::Vacant(slot) => {
                slot.insert(task);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &TaskId) -> TaskStoreResult<Option<Task>> {
        Ok(self.tasks.get(id).map(|entry| entry.value().clone()))
    }

    async fn transition(&self, id: &TaskId, next: TaskState) -> TaskStoreResult<Task> {
        let mut entry = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskStoreError::NotFound(id.clone()))?;
        entry.transition(next)?;
        Ok(entry.clone())
    }

    async fn remove(&self, id: &TaskId) -> TaskStoreResult<bool> {
        Ok(self.tasks.remove(id).is_some())
    }

    async fn list(&self) -> TaskStoreResult<Vec<Task>> {
        Ok(self.tasks.iter().map(|entry| entry.value().clone()).collect())
    }
}
