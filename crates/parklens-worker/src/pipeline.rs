//! In-process analysis pipeline: downsample, prompt, infer, extract frames.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parklens_media::{DownsampleOptions, MediaError};
use parklens_models::{generate_telemetry, AnalysisResult, GpsPoint, Spot};
use serde_json::Value;
use tokio::fs;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{RunnerError, WorkerError, WorkerResult};
use crate::gemini::{load_prompt, video_mime_type, GeminiClient};
use crate::runner::{
    cancelled, processed_video_path_for, result_path_for, AnalysisRunner, RunOutput, RunRequest,
};

/// Duration assumed for telemetry when the video cannot be probed.
pub const FALLBACK_DURATION_SECS: f64 = 60.0;

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result_path: PathBuf,
    pub result: AnalysisResult,
}

/// Runs the Gemini analysis inside the current process.
#[derive(Clone)]
pub struct GeminiRunner {
    client: Arc<GeminiClient>,
    model: String,
    prompt_file: PathBuf,
    optimize: bool,
    downsample: DownsampleOptions,
}

impl GeminiRunner {
    pub fn new(client: GeminiClient, model: impl Into<String>, prompt_file: impl Into<PathBuf>) -> Self {
        Self {
            client: Arc::new(client),
            model: model.into(),
            prompt_file: prompt_file.into(),
            optimize: true,
            downsample: DownsampleOptions::default(),
        }
    }

    /// Skip the FFmpeg downsampling step and upload the input as-is.
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Analyze `video`, writing every output into `work_dir`.
    ///
    /// Telemetry is appended to the prompt only when both endpoints of the
    /// travel segment are known.
    pub async fn analyze(
        &self,
        video: &Path,
        work_dir: &Path,
        gps: Option<(GpsPoint, GpsPoint)>,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<AnalysisOutcome> {
        if !fs::try_exists(video).await.unwrap_or(false) {
            return Err(WorkerError::Media(MediaError::FileNotFound(video.to_path_buf())));
        }
        fs::create_dir_all(work_dir).await?;

        let upload = self.prepare_upload(video, work_dir, &cancel).await?;

        let mut prompt = load_prompt(&self.prompt_file).await;
        if let Some((start, end)) = gps {
            let duration = match parklens_media::get_duration(&upload).await {
                Ok(d) => d,
                Err(e) => {
                    warn!("Could not determine video duration: {}", e);
                    FALLBACK_DURATION_SECS
                }
            };
            info!(
                "Generating telemetry for {:.1}s video ({} -> {})",
                duration, start, end
            );
            prompt.push_str("\n\n## TELEMETRY LOG (GPS)\n");
            prompt.push_str(&generate_telemetry(duration, &start, &end));
        }

        info!("Reading and encoding video: {}", upload.display());
        let bytes = fs::read(&upload).await?;
        let text = self
            .client
            .generate_from_video(&self.model, &prompt, &bytes, video_mime_type(&upload))
            .await?;

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| WorkerError::ai_failed(format!("Failed to parse analysis JSON: {}", e)))?;
        let mut result = AnalysisResult::from_value(value)?;

        extract_spot_frames(video, work_dir, &mut result.spots, &cancel).await?;

        let result_path = result_path_for(work_dir, video);
        let pretty = serde_json::to_vec_pretty(&result)
            .map_err(|e| WorkerError::ai_failed(format!("Failed to encode result: {}", e)))?;
        fs::write(&result_path, pretty).await?;
        info!(
            "Saved analysis to {} ({} spots)",
            result_path.display(),
            result.spots.len()
        );

        Ok(AnalysisOutcome {
            result_path,
            result,
        })
    }

    /// Downsample `video` when optimization is on; fall back to the original
    /// on FFmpeg failure.
    async fn prepare_upload(
        &self,
        video: &Path,
        work_dir: &Path,
        cancel: &watch::Receiver<bool>,
    ) -> WorkerResult<PathBuf> {
        if !self.optimize {
            return Ok(video.to_path_buf());
        }

        let processed = processed_video_path_for(work_dir, video);
        match parklens_media::downsample_video(video, &processed, &self.downsample, Some(cancel.clone()))
            .await
        {
            Ok(()) => {
                info!("Video optimized successfully");
                Ok(processed)
            }
            Err(MediaError::Cancelled) => Err(MediaError::Cancelled.into()),
            Err(e) => {
                warn!("Error optimizing video, using original: {}", e);
                let _ = fs::remove_file(&processed).await;
                Ok(video.to_path_buf())
            }
        }
    }
}

/// Extract one JPEG per timestamped spot from the full-rate source video and
/// point `spot.frame` at the file name. Spots whose frame cannot be
/// extracted keep no frame reference.
async fn extract_spot_frames(
    video: &Path,
    work_dir: &Path,
    spots: &mut [Spot],
    cancel: &watch::Receiver<bool>,
) -> WorkerResult<()> {
    for (index, spot) in spots.iter_mut().enumerate() {
        let Some(at) = spot.timestamp_secs() else {
            continue;
        };

        let name = frame_name(spot, index);
        match parklens_media::extract_frame(video, at, work_dir.join(&name), Some(cancel.clone())).await {
            Ok(()) => spot.frame = Some(name),
            Err(MediaError::Cancelled) => return Err(MediaError::Cancelled.into()),
            Err(e) => {
                warn!("Could not extract frame at {:.2}s: {}", at, e);
                spot.frame = None;
            }
        }
    }
    Ok(())
}

/// `frame_<id>.jpg` for integer ids, otherwise `frame_<position>.jpg`.
fn frame_name(spot: &Spot, index: usize) -> String {
    match spot.id.as_ref().and_then(Value::as_u64) {
        Some(id) => format!("frame_{}.jpg", id),
        None => format!("frame_{}.jpg", index + 1),
    }
}

#[async_trait]
impl AnalysisRunner for GeminiRunner {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn run(
        &self,
        request: &RunRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunOutput, RunnerError> {
        let started = Instant::now();
        let gps = Some((request.start, request.end));

        tokio::select! {
            outcome = self.analyze(&request.video_path, &request.work_dir, gps, cancel.clone()) => {
                match outcome {
                    Ok(outcome) => Ok(RunOutput {
                        diagnostics: format!(
                            "{} spots detected in {:.1}s",
                            outcome.result.spots.len(),
                            started.elapsed().as_secs_f64()
                        ),
                    }),
                    Err(WorkerError::Media(MediaError::Cancelled)) => Err(RunnerError::Cancelled),
                    Err(e) => Err(RunnerError::failed(e.to_string())),
                }
            }
            _ = cancelled(cancel) => Err(RunnerError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_frame_name() {
        let spot: Spot = serde_json::from_value(json!({"id": 4})).unwrap();
        assert_eq!(frame_name(&spot, 0), "frame_4.jpg");

        let spot: Spot = serde_json::from_value(json!({"id": "a"})).unwrap();
        assert_eq!(frame_name(&spot, 2), "frame_3.jpg");
    }

    #[tokio::test]
    async fn test_analyze_writes_normalized_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("TELEMETRY LOG (GPS)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{
                    "text": "```json\n{\"gps_path\": [{\"timestamp\": 0, \"lat\": 1.0, \"lon\": 2.0}], \"spots\": []}\n```"
                }]}}]
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let video = dir.path().join("drive.mp4");
        fs::write(&video, b"not really a video").await.unwrap();
        let work = dir.path().join("work");

        let runner = GeminiRunner::new(
            GeminiClient::new("k").with_base_url(server.uri()),
            "gemini-3-flash-preview",
            dir.path().join("missing_prompt.md"),
        )
        .with_optimize(false);

        let start = GpsPoint::new(1.0, 2.0).unwrap();
        let (_tx, rx) = watch::channel(false);
        let outcome = runner
            .analyze(&video, &work, Some((start, start.offset(0.005))), rx)
            .await
            .unwrap();

        assert_eq!(outcome.result_path, work.join("analysis_drive.mp4.json"));
        assert_eq!(outcome.result.path.len(), 1);
        assert_eq!(outcome.result.path[0].lng, Some(2.0));

        let written: Value = serde_json::from_slice(&fs::read(&outcome.result_path).await.unwrap()).unwrap();
        assert!(written.get("gps_path").is_none());
        assert_eq!(written["path"][0]["lng"], 2.0);
    }

    #[tokio::test]
    async fn test_analyze_rejects_non_json_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "I could not find any spots."}]}}]
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let video = dir.path().join("drive.mov");
        fs::write(&video, b"x").await.unwrap();

        let runner = GeminiRunner::new(
            GeminiClient::new("k").with_base_url(server.uri()),
            "gemini-2.5-flash",
            dir.path().join("prompt.md"),
        )
        .with_optimize(false);

        let (_tx, rx) = watch::channel(false);
        let err = runner.analyze(&video, dir.path(), None, rx).await.unwrap_err();
        assert!(matches!(err, WorkerError::AiFailed(_)));
        assert!(!result_path_for(dir.path(), &video).exists());
    }

    #[tokio::test]
    async fn test_missing_video() {
        let dir = TempDir::new().unwrap();
        let runner = GeminiRunner::new(GeminiClient::new("k"), "m", "prompt.md");
        let (_tx, rx) = watch::channel(false);
        let err = runner
            .analyze(&dir.path().join("nope.mp4"), dir.path(), None, rx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Media(MediaError::FileNotFound(_))));
    }
}
