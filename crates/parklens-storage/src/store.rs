//! The artifact store abstraction.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// URL path prefix under which artifacts are served.
pub const ARTIFACT_URL_PREFIX: &str = "/artifacts";

/// Object read back from a store, possibly a byte range of it.
#[derive(Debug, Clone)]
pub struct ArtifactObject {
    pub data: Vec<u8>,
    pub content_type: String,
    /// `Content-Range` value when only part of the object was returned
    pub content_range: Option<String>,
}

/// Durable storage for task artifacts.
///
/// Keys are relative, `/`-separated and always start with the owning task
/// ID. Artifacts are write-once for the lifetime of the process: nothing in
/// this trait deletes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Short backend name for logs and readiness output.
    fn backend_name(&self) -> &'static str;

    /// Publish a copy of the local file `src` under `key`.
    async fn put_file(&self, src: &Path, key: &str) -> StorageResult<()>;

    /// Publish `src` under `key`, consuming the local file.
    async fn move_file(&self, src: &Path, key: &str) -> StorageResult<()> {
        self.put_file(src, key).await?;
        if let Err(e) = tokio::fs::remove_file(src).await {
            tracing::warn!("Failed to remove {} after upload: {}", src.display(), e);
        }
        Ok(())
    }

    /// Publish in-memory bytes under `key`.
    async fn put_bytes(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<()>;

    /// Read a whole object.
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Read an object, or the part selected by an HTTP `Range` value.
    async fn read_range(&self, key: &str, range: Option<&str>) -> StorageResult<ArtifactObject>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Verify the backend is reachable.
    async fn check_connectivity(&self) -> StorageResult<()>;

    /// Filesystem root when artifacts can be served straight from disk.
    fn local_root(&self) -> Option<&Path> {
        None
    }

    /// Client-facing URL for `key`.
    fn url_for(&self, key: &str) -> String {
        artifact_url(key)
    }
}

/// Client-facing URL path for an artifact key.
pub fn artifact_url(key: &str) -> String {
    format!("{}/{}", ARTIFACT_URL_PREFIX, key.trim_start_matches('/'))
}

/// Reject keys that could escape the artifact namespace.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");

    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Guess a MIME type from the key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "json" => "application/json",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}
