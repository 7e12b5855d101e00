//! The task store abstraction.

use async_trait::async_trait;
use parklens_models::{Task, TaskId, TaskState};

use crate::error::TaskStoreResult;

/// Keyed storage of task records.
///
/// Implementations must make `transition` atomic per record: concurrent
/// readers see either the old state or the new one, never a mix.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Short backend name for logs and readiness output.
    fn backend_name(&self) -> &'static str;

    /// Insert a new record. Fails with `Duplicate` if the ID is taken.
    async fn insert(&self, task: Task) -> TaskStoreResult<()>;

    /// Fetch a snapshot of one record.
    async fn get(&self, id: &TaskId) -> TaskStoreResult<Option<Task>>;

    /// Apply a forward state transition and return the updated record.
    async fn transition(&self, id: &TaskId, next: TaskState) -> TaskStoreResult<Task>;

    /// Drop a record. Returns whether it existed.
    async fn remove(&self, id: &TaskId) -> TaskStoreResult<bool>;

    /// Snapshot of every record.
    async fn list(&self) -> TaskStoreResult<Vec<Task>>;

    /// Verify the backend is reachable.
    async fn check_connectivity(&self) -> TaskStoreResult<()> {
        Ok(())
    }
}
