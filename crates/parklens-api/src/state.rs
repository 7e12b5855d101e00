//! Application state.

use std::sync::Arc;

use parklens_storage::{ArtifactStore, StorageConfig};
use parklens_worker::{TaskExecutor, WorkerConfig};
use tokio::fs;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub worker: Arc<WorkerConfig>,
    pub executor: TaskExecutor,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl AppState {
    /// Build the artifact store and executor described by the configs.
    pub async fn new(
        config: ApiConfig,
        worker: WorkerConfig,
        storage: StorageConfig,
    ) -> ApiResult<Self> {
        let artifacts = parklens_storage::build_store(&storage).await?;
        let executor = TaskExecutor::from_config(&worker, Arc::clone(&artifacts))?;
        Self::from_parts(config, worker, executor, artifacts).await
    }

    /// Assemble state from prebuilt parts, creating the working directories.
    pub async fn from_parts(
        config: ApiConfig,
        worker: WorkerConfig,
        executor: TaskExecutor,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> ApiResult<Self> {
        for dir in [&worker.uploads_dir, &worker.work_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                ApiError::internal(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }

        Ok(Self {
            config,
            worker: Arc::new(worker),
            executor,
            artifacts,
        })
    }
}
