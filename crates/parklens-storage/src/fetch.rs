//! Remote input retrieval.

use std::path::Path;

use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{StorageError, StorageResult};

/// Stream `url` into `dest`, returning the number of bytes written.
///
/// The body is written to a temporary sibling first so `dest` only ever
/// holds a complete download.
pub async fn fetch_remote(client: &reqwest::Client, url: &Url, dest: &Path) -> StorageResult<u64> {
    debug!("Fetching {} to {}", url, dest.display());

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| StorageError::fetch_failed(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(StorageError::fetch_failed(format!("{}: HTTP {}", url, status)));
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = dest.with_extension("part");
    let mut file = fs::File::create(&tmp).await?;

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&tmp).await;
                return Err(StorageError::fetch_failed(format!("{}: {}", url, e)));
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    fs::rename(&tmp, dest).await?;
    info!("Fetched {} ({} bytes)", url, written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_remote_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/presets/downtown.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fake-video".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("t1").join("downtown.mp4");
        let url = Url::parse(&format!("{}/presets/downtown.mp4", server.uri())).unwrap();

        let n = fetch_remote(&reqwest::Client::new(), &url, &dest).await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(fs::read(&dest).await.unwrap(), b"fake-video");
        assert!(!dest.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_fetch_remote_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing.mp4");
        let url = Url::parse(&format!("{}/missing.mp4", server.uri())).unwrap();

        let err = fetch_remote(&reqwest::Client::new(), &url, &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::FetchFailed(_)));
        assert!(!dest.exists());
    }
}
