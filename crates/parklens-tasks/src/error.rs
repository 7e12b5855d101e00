//! Task store error types.

use parklens_models::{ModelError, TaskId};
use thiserror::Error;

pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("Task already exists: {0}")]
    Duplicate(TaskId),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Transition rejected: {0}")]
    Transition(#[from] ModelError),

    #[error("Concurrent update conflict on task {0}")]
    Conflict(TaskId),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskStoreError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }
}
