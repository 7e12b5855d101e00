//! Local filesystem artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::{content_type_for, validate_key, ArtifactObject, ArtifactStore};

/// Artifacts stored as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Create the store, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::config_error(format!(
                "cannot create artifacts dir {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    /// Filesystem path for `key`.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn read_existing(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(StorageError::DownloadFailed(format!("{}: {}", key, e))),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn put_file(&self, src: &Path, key: &str) -> StorageResult<()> {
        let dst = self.path_for(key)?;
        debug!("Publishing {} to {}", src.display(), key);
        parklens_media::copy_file(src, &dst).await?;
        Ok(())
    }

    async fn move_file(&self, src: &Path, key: &str) -> StorageResult<()> {
        let dst = self.path_for(key)?;
        parklens_media::move_file(src, &dst).await?;
        info!("Published {} to {}", src.display(), key);
        Ok(())
    }

    async fn put_bytes(&self, data: Vec<u8>, key: &str, _content_type: &str) -> StorageResult<()> {
        let dst = self.path_for(key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&dst, data)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;
        Ok(())
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.read_existing(key).await
    }

    async fn read_range(&self, key: &str, range: Option<&str>) -> StorageResult<ArtifactObject> {
        let data = self.read_existing(key).await?;
        let content_type = content_type_for(key).to_string();

        let Some(range) = range else {
            return Ok(ArtifactObject {
                data,
                content_type,
                content_range: None,
            });
        };

        let total = data.len() as u64;
        let (start, end) = parse_byte_range(range, total)
            .ok_or_else(|| StorageError::InvalidRange(range.to_string()))?;

        Ok(ArtifactObject {
            data: data[start as usize..=end as usize].to_vec(),
            content_type,
            content_range: Some(format!("bytes {}-{}/{}", start, end, total)),
        })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(StorageError::config_error(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn local_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// Resolve a single `bytes=` range against an object of `total` bytes into
/// inclusive offsets.
pub(crate) fn parse_byte_range(range: &str, total: u64) -> Option<(u64, u64)> {
    let spec = range.trim().strip_prefix("bytes=")?;
    if spec.contains(',') || total == 0 {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    let (start, end) = if start.is_empty() {
        // Suffix range: last N bytes
        let n: u64 = end.parse().ok()?;
        if n == 0 {
            return None;
        }
        (total.saturating_sub(n), total - 1)
    } else {
        let start: u64 = start.parse().ok()?;
        let end = if end.is_empty() {
            total - 1
        } else {
            end.parse::<u64>().ok()?.min(total - 1)
        };
        (start, end)
    };

    (start <= end && start < total).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_byte_range() {
        assert_eq!(parse_byte_range("bytes=0-3", 10), Some((0, 3)));
        assert_eq!(parse_byte_range("bytes=5-", 10), Some((5, 9)));
        assert_eq!(parse_byte_range("bytes=-4", 10), Some((6, 9)));
        assert_eq!(parse_byte_range("bytes=8-100", 10), Some((8, 9)));
        assert_eq!(parse_byte_range("bytes=10-12", 10), None);
        assert_eq!(parse_byte_range("bytes=0-1,4-5", 10), None);
        assert_eq!(parse_byte_range("items=0-1", 10), None);
    }

    #[tokio::test]
    async fn test_put_and_read() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("artifacts")).await.unwrap();

        store
            .put_bytes(b"{\"spots\":[]}".to_vec(), "t1/result.json", "application/json")
            .await
            .unwrap();

        assert!(store.exists("t1/result.json").await.unwrap());
        assert!(!store.exists("t2/result.json").await.unwrap());
        assert_eq!(store.read("t1/result.json").await.unwrap(), b"{\"spots\":[]}");
        assert!(store.read("t2/result.json").await.unwrap_err().is_not_found());
        assert_eq!(store.url_for("t1/result.json"), "/artifacts/t1/result.json");
    }

    #[tokio::test]
    async fn test_move_and_copy_file() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("artifacts")).await.unwrap();

        let work = dir.path().join("work");
        fs::create_dir_all(&work).await.unwrap();
        let processed = work.join("processed_clip.mp4");
        let upload = work.join("clip.mp4");
        fs::write(&processed, b"small").await.unwrap();
        fs::write(&upload, b"large").await.unwrap();

        store.move_file(&processed, "t1/video.mp4").await.unwrap();
        store.put_file(&upload, "t1/source.mp4").await.unwrap();

        assert!(!processed.exists());
        assert!(upload.exists());
        assert_eq!(store.read("t1/video.mp4").await.unwrap(), b"small");
        assert_eq!(store.read("t1/source.mp4").await.unwrap(), b"large");
    }

    #[tokio::test]
    async fn test_read_range() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).await.unwrap();
        store
            .put_bytes(b"0123456789".to_vec(), "t1/video.mp4", "video/mp4")
            .await
            .unwrap();

        let full = store.read_range("t1/video.mp4", None).await.unwrap();
        assert_eq!(full.data.len(), 10);
        assert_eq!(full.content_type, "video/mp4");
        assert!(full.content_range.is_none());

        let part = store.read_range("t1/video.mp4", Some("bytes=2-4")).await.unwrap();
        assert_eq!(part.data, b"234");
        assert_eq!(part.content_range.as_deref(), Some("bytes 2-4/10"));

        assert!(matches!(
            store.read_range("t1/video.mp4", Some("bytes=20-")).await,
            Err(StorageError::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).await.unwrap();
        assert!(matches!(
            store.put_bytes(vec![1], "../escape", "text/plain").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
