//! Artifact storage for the ParkLens backend.
//!
//! This crate provides:
//! - The [`ArtifactStore`] abstraction over durable task artifacts
//! - A local-filesystem backend and an S3-compatible backend (R2, Supabase)
//! - Streaming download of remote input videos

pub mod config;
pub mod error;
pub mod fetch;
pub mod local;
pub mod s3;
pub mod store;

use std::sync::Arc;

pub use config::{S3Config, StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use fetch::fetch_remote;
pub use local::LocalArtifactStore;
pub use s3::S3ArtifactStore;
pub use store::{
    artifact_url, content_type_for, validate_key, ArtifactObject, ArtifactStore,
    ARTIFACT_URL_PREFIX,
};

/// Build the artifact store selected by `config`.
pub async fn build_store(config: &StorageConfig) -> StorageResult<Arc<dyn ArtifactStore>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalArtifactStore::new(&config.artifacts_dir).await?)),
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .clone()
                .ok_or_else(|| StorageError::config_error("S3 backend selected without S3 settings"))?;
            Ok(Arc::new(S3ArtifactStore::new(s3)))
        }
    }
}
