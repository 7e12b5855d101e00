//! Worker error types.

use std::time::Duration;

use parklens_models::{FailureCause, TaskFailure};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure of a single analysis runner invocation.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Runner exited with code {exit_code:?}")]
    Failed {
        exit_code: Option<i32>,
        /// Captured diagnostic output, verbatim
        diagnostics: String,
    },

    #[error("Runner cancelled")]
    Cancelled,

    #[error("Runner timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Failed to start runner: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self::Failed {
            exit_code: None,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("No result produced: {reason}")]
    NoResult {
        reason: String,
        diagnostics: Option<String>,
    },

    #[error("Materialization failed: {0}")]
    Materialization(String),

    #[error("AI analysis failed: {0}")]
    AiFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Executor is shutting down")]
    ShuttingDown,

    #[error("Storage error: {0}")]
    Storage(#[from] parklens_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] parklens_media::MediaError),

    #[error("Task store error: {0}")]
    TaskStore(#[from] parklens_tasks::TaskStoreError),

    #[error("Model error: {0}")]
    Model(#[from] parklens_models::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn no_result(reason: impl Into<String>) -> Self {
        Self::NoResult {
            reason: reason.into(),
            diagnostics: None,
        }
    }

    pub fn materialization(msg: impl Into<String>) -> Self {
        Self::Materialization(msg.into())
    }

    pub fn ai_failed(msg: impl Into<String>) -> Self {
        Self::AiFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Attach runner diagnostics to a missing-result error.
    pub fn with_diagnostics(self, diagnostics: impl Into<String>) -> Self {
        match self {
            Self::NoResult { reason, .. } => Self::NoResult {
                reason,
                diagnostics: Some(diagnostics.into()),
            },
            other => other,
        }
    }

    /// Convert into the failure recorded on the task.
    pub fn to_failure(&self) -> TaskFailure {
        match self {
            Self::Fetch(msg) => {
                TaskFailure::new(FailureCause::FetchFailed, "fetch failed").with_details(msg.clone())
            }
            Self::Runner(RunnerError::Failed { diagnostics, .. }) => {
                TaskFailure::new(FailureCause::RunnerFailed, "analysis runner failed")
                    .with_details(diagnostics.clone())
            }
            Self::Runner(RunnerError::Cancelled) => {
                TaskFailure::new(FailureCause::Cancelled, "analysis cancelled")
            }
            Self::Runner(RunnerError::TimedOut(after)) => TaskFailure::new(
                FailureCause::TimedOut,
                format!("analysis timed out after {}s", after.as_secs()),
            ),
            Self::Runner(err) => TaskFailure::new(FailureCause::RunnerFailed, "analysis runner failed")
                .with_details(err.to_string()),
            Self::NoResult {
                reason,
                diagnostics,
            } => TaskFailure::new(FailureCause::NoResult, "no result produced")
                .with_details(diagnostics.clone().unwrap_or_else(|| reason.clone())),
            Self::Materialization(msg) => {
                TaskFailure::new(FailureCause::MaterializationFailed, "materialization failed")
                    .with_details(msg.clone())
            }
            other => TaskFailure::new(FailureCause::Internal, "internal error")
                .with_details(other.to_string()),
        }
    }
}
