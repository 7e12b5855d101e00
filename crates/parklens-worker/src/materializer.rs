//! Publishing of runner output as durable task artifacts.
//!
//! Layout under the artifact store, always prefixed by the task id:
//!
//! ```text
//! {task_id}/result.json
//! {task_id}/video.mp4                  (downsampled copy, when the runner made one)
//! {task_id}/source.<ext>               (otherwise)
//! {task_id}/frames/{task_id}_{name}    (one per referenced frame)
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parklens_models::{AnalysisResult, Artifact, ArtifactKind, TaskResult};
use parklens_storage::ArtifactStore;
use tokio::fs;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::TaskLogger;
use crate::runner::RunRequest;

pub struct ResultMaterializer {
    store: Arc<dyn ArtifactStore>,
}

impl ResultMaterializer {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Read and normalize the result file the runner left in the working
    /// directory. Absent or malformed files are reported as
    /// [`WorkerError::NoResult`].
    pub async fn read_result(&self, request: &RunRequest) -> WorkerResult<AnalysisResult> {
        let path = request.result_path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkerError::no_result(format!(
                    "{} was not written",
                    file_label(&path)
                )))
            }
            Err(e) => return Err(e.into()),
        };

        AnalysisResult::from_slice(&bytes).map_err(|e| {
            WorkerError::no_result(format!("{} is malformed: {}", file_label(&path), e))
        })
    }

    /// Publish the video, frames and result of a finished run.
    pub async fn materialize(
        &self,
        request: &RunRequest,
        mut analysis: AnalysisResult,
    ) -> WorkerResult<TaskResult> {
        let logger = TaskLogger::new(&request.task_id, "materialize");
        let id = request.task_id.as_str();
        let mut artifacts = Vec::new();

        let video = self.publish_video(request).await?;
        let video_url = video.url.clone();
        artifacts.push(video);

        // Several spots may reference the same frame
        let mut published: HashMap<String, String> = HashMap::new();
        for spot in analysis.spots.iter_mut() {
            let Some(name) = spot.frame.take() else {
                continue;
            };

            if let Some(url) = published.get(&name) {
                spot.frame = Some(url.clone());
                continue;
            }

            if !is_plain_file_name(&name) {
                logger.log_warning(&format!("Dropping unsafe frame reference '{}'", name));
                continue;
            }

            let src = request.work_dir.join(&name);
            if !fs::try_exists(&src).await.unwrap_or(false) {
                logger.log_warning(&format!("Referenced frame {} is missing", name));
                continue;
            }

            let key = format!("{}/frames/{}_{}", id, id, name);
            self.store
                .move_file(&src, &key)
                .await
                .map_err(|e| WorkerError::materialization(format!("frame {}: {}", name, e)))?;

            let url = self.store.url_for(&key);
            debug!(task_id = %id, "Published frame {} as {}", name, key);
            published.insert(name, url.clone());
            artifacts.push(Artifact {
                kind: ArtifactKind::Frame,
                key,
                url: url.clone(),
            });
            spot.frame = Some(url);
        }

        // Written last so it reflects the rewritten frame references
        let key = format!("{}/result.json", id);
        let body = serde_json::to_vec_pretty(&analysis)
            .map_err(|e| WorkerError::materialization(format!("result.json: {}", e)))?;
        self.store
            .put_bytes(body, &key, "application/json")
            .await
            .map_err(|e| WorkerError::materialization(format!("result.json: {}", e)))?;
        artifacts.push(Artifact {
            kind: ArtifactKind::ResultJson,
            url: self.store.url_for(&key),
            key,
        });

        let result_path = request.result_path();
        if let Err(e) = fs::remove_file(&result_path).await {
            debug!("Could not remove {}: {}", result_path.display(), e);
        }

        logger.log_completion(&format!(
            "{} artifacts published ({} frames)",
            artifacts.len(),
            published.len()
        ));

        Ok(TaskResult {
            analysis,
            video_url,
            artifacts,
        })
    }

    /// Prefer the runner's downsampled video; otherwise publish a copy of
    /// the source input.
    async fn publish_video(&self, request: &RunRequest) -> WorkerResult<Artifact> {
        let id = request.task_id.as_str();
        let processed = request.processed_video_path();

        if fs::try_exists(&processed).await.unwrap_or(false) {
            let key = format!("{}/video.mp4", id);
            self.store.move_file(&processed, &key).await.map_err(|e| {
                WorkerError::materialization(format!("{}: {}", file_label(&processed), e))
            })?;
            return Ok(Artifact {
                kind: ArtifactKind::ProcessedVideo,
                url: self.store.url_for(&key),
                key,
            });
        }

        let ext = request
            .video_path
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("mp4")
            .to_ascii_lowercase();
        let key = format!("{}/source.{}", id, ext);
        self.store
            .put_file(&request.video_path, &key)
            .await
            .map_err(|e| {
                WorkerError::materialization(format!("{}: {}", file_label(&request.video_path), e))
            })?;

        Ok(Artifact {
            kind: ArtifactKind::SourceVideo,
            url: self.store.url_for(&key),
            key,
        })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && Path::new(name).file_name().is_some_and(|n| n == name)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parklens_models::{GpsPoint, TaskId};
    use parklens_storage::LocalArtifactStore;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        artifacts: PathBuf,
        request: RunRequest,
        materializer: ResultMaterializer,
    }

    async fn fixture(task_id: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let artifacts = dir.path().join("artifacts");
        let work_dir = dir.path().join("work").join(task_id);
        fs::create_dir_all(&work_dir).await.unwrap();

        let video_path = dir.path().join("uploads").join(format!("{}.MOV", task_id));
        fs::create_dir_all(video_path.parent().unwrap()).await.unwrap();
        fs::write(&video_path, b"source-video").await.unwrap();

        let store = LocalArtifactStore::new(&artifacts).await.unwrap();
        let start = GpsPoint::new(10.0, 20.0).unwrap();
        Fixture {
            artifacts,
            request: RunRequest {
                task_id: TaskId::from(task_id),
                video_path,
                work_dir,
                start,
                end: start.offset(0.005),
            },
            materializer: ResultMaterializer::new(Arc::new(store)),
            _dir: dir,
        }
    }

    async fn write_result(request: &RunRequest, value: serde_json::Value) {
        fs::write(request.result_path(), serde_json::to_vec(&value).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_result_is_no_result() {
        let f = fixture("t1").await;
        let err = f.materializer.read_result(&f.request).await.unwrap_err();
        assert!(matches!(err, WorkerError::NoResult { .. }));
    }

    #[tokio::test]
    async fn test_malformed_result_is_no_result() {
        let f = fixture("t1").await;
        fs::write(f.request.result_path(), b"{not json").await.unwrap();
        assert!(matches!(
            f.materializer.read_result(&f.request).await,
            Err(WorkerError::NoResult { .. })
        ));

        write_result(&f.request, json!([1, 2, 3])).await;
        assert!(matches!(
            f.materializer.read_result(&f.request).await,
            Err(WorkerError::NoResult { .. })
        ));
    }

    #[tokio::test]
    async fn test_frames_are_published_under_task_prefix() {
        let f = fixture("task-a").await;
        fs::write(f.request.work_dir.join("frame_1.jpg"), b"jpg1").await.unwrap();
        fs::write(f.request.work_dir.join("frame_2.jpg"), b"jpg2").await.unwrap();
        write_result(
            &f.request,
            json!({
                "spots": [
                    {"id": 1, "timestamp": 3, "lat": 1.0, "lon": 2.0, "frame": "frame_1.jpg"},
                    {"id": 2, "timestamp": 8, "lat": 1.1, "lon": 2.1, "frame": "frame_2.jpg"}
                ],
                "travel_path": []
            }),
        )
        .await;

        let analysis = f.materializer.read_result(&f.request).await.unwrap();
        let result = f.materializer.materialize(&f.request, analysis).await.unwrap();

        assert_eq!(result.video_url, "/artifacts/task-a/source.mov");
        assert_eq!(result.analysis.spots.len(), 2);
        for (n, spot) in result.analysis.spots.iter().enumerate() {
            let url = spot.frame.as_deref().unwrap();
            assert_eq!(
                url,
                format!("/artifacts/task-a/frames/task-a_frame_{}.jpg", n + 1)
            );
            let on_disk = f.artifacts.join(url.trim_start_matches("/artifacts/"));
            assert!(on_disk.exists(), "{} missing", on_disk.display());
        }
        assert_eq!(result.analysis.spots[0].lng, Some(2.0));

        let published: serde_json::Value = serde_json::from_slice(
            &fs::read(f.artifacts.join("task-a/result.json")).await.unwrap(),
        )
        .unwrap();
        assert_eq!(
            published["spots"][1]["frame"],
            "/artifacts/task-a/frames/task-a_frame_2.jpg"
        );
        assert!(published.get("travel_path").is_none());
        assert!(f.request.video_path.exists());
    }

    #[tokio::test]
    async fn test_missing_and_unsafe_frames_are_dropped() {
        let f = fixture("t2").await;
        write_result(
            &f.request,
            json!({
                "spots": [
                    {"id": 1, "frame": "frame_1.jpg"},
                    {"id": 2, "frame": "../../etc/passwd"}
                ]
            }),
        )
        .await;

        let analysis = f.materializer.read_result(&f.request).await.unwrap();
        let result = f.materializer.materialize(&f.request, analysis).await.unwrap();
        assert!(result.analysis.spots.iter().all(|s| s.frame.is_none()));
        assert!(result
            .artifacts
            .iter()
            .all(|a| a.kind != ArtifactKind::Frame));
    }

    #[tokio::test]
    async fn test_processed_video_preferred() {
        let f = fixture("t3").await;
        let processed = f.request.processed_video_path();
        fs::write(&processed, b"small").await.unwrap();
        write_result(&f.request, json!({"spots": []})).await;

        let analysis = f.materializer.read_result(&f.request).await.unwrap();
        let result = f.materializer.materialize(&f.request, analysis).await.unwrap();

        assert_eq!(result.video_url, "/artifacts/t3/video.mp4");
        assert_eq!(fs::read(f.artifacts.join("t3/video.mp4")).await.unwrap(), b"small");
        assert!(!processed.exists());
        assert!(!f.artifacts.join("t3/source.mov").exists());
    }

    #[test]
    fn test_is_plain_file_name() {
        assert!(is_plain_file_name("frame_1.jpg"));
        for bad in ["", ".", "..", "a/b.jpg", "a\\b.jpg", "/frame.jpg"] {
            assert!(!is_plain_file_name(bad), "accepted '{}'", bad);
        }
    }
}
