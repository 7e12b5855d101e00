//! Task submission and status handlers.

use std::path::{Path as FsPath, PathBuf};

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::{Form, Json};
use parklens_models::{GpsPoint, InputRef, TaskId, TaskView};
use parklens_worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_upload_bytes;
use crate::security::{is_valid_preset_id, upload_extension, validate_video_url};
use crate::state::AppState;

/// Response for accepted submissions.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

impl From<TaskId> for SubmitResponse {
    fn from(id: TaskId) -> Self {
        Self { task_id: id.0 }
    }
}

fn parse_start_gps(raw: Option<&str>) -> ApiResult<GpsPoint> {
    let raw = raw
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing start_gps field"))?;
    raw.parse::<GpsPoint>()
        .map_err(|e| ApiError::bad_request(format!("Invalid start_gps: {}", e)))
}

// =============================================================================
// Upload
// =============================================================================

#[derive(Default)]
struct UploadForm {
    video: Option<PathBuf>,
    bytes: u64,
    start_gps: Option<String>,
}

impl UploadForm {
    /// Remove a stored (possibly partial) upload after a rejected request.
    async fn discard(&self) {
        if let Some(path) = &self.video {
            if let Err(e) = fs::remove_file(path).await {
                warn!("Failed to remove rejected upload {}: {}", path.display(), e);
            }
        }
    }
}

async fn read_upload_form(
    multipart: &mut Multipart,
    uploads_dir: &FsPath,
    task_id: &TaskId,
    form: &mut UploadForm,
) -> ApiResult<()> {
    while let Some(mut field) = multipart.next_field().await.map_err(ApiError::multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                if form.video.is_some() {
                    return Err(ApiError::bad_request("Duplicate video field"));
                }
                let ext = upload_extension(field.file_name());
                let path = uploads_dir.join(format!("{}{}", task_id, ext));
                let mut file = fs::File::create(&path).await.map_err(|e| {
                    ApiError::internal(format!("cannot create {}: {}", path.display(), e))
                })?;
                form.video = Some(path);

                while let Some(chunk) = field.chunk().await.map_err(ApiError::multipart)? {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| ApiError::internal(format!("upload write failed: {}", e)))?;
                    form.bytes += chunk.len() as u64;
                }
                file.flush()
                    .await
                    .map_err(|e| ApiError::internal(format!("upload write failed: {}", e)))?;
            }
            "start_gps" => {
                form.start_gps = Some(field.text().await.map_err(ApiError::multipart)?);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Accept a video upload plus its starting coordinate and queue analysis.
///
/// The file lands in the uploads directory under the new task id; nothing
/// is registered until every field has validated.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<SubmitResponse>> {
    let task_id = TaskId::new();
    let mut form = UploadForm::default();

    let validated = match read_upload_form(
        &mut multipart,
        &state.worker.uploads_dir,
        &task_id,
        &mut form,
    )
    .await
    {
        Ok(()) => parse_start_gps(form.start_gps.as_deref()).and_then(|start| {
            form.video
                .clone()
                .map(|video| (video, start))
                .ok_or_else(|| ApiError::bad_request("Missing video file"))
        }),
        Err(e) => Err(e),
    };

    let (video, start) = match validated {
        Ok(v) => v,
        Err(e) => {
            form.discard().await;
            return Err(e);
        }
    };

    record_upload_bytes(form.bytes);
    info!(task_id = %task_id, bytes = form.bytes, "Stored upload {}", video.display());

    let id = state
        .executor
        .submit_with_id(task_id, InputRef::Local(video), start)
        .await?;
    Ok(Json(id.into()))
}

// =============================================================================
// Presets
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PresetForm {
    #[serde(default)]
    pub preset_id: Option<String>,
    #[serde(default)]
    pub start_gps: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

impl PresetForm {
    async fn from_multipart(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(ApiError::multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            let slot = match name.as_str() {
                "preset_id" => &mut form.preset_id,
                "start_gps" => &mut form.start_gps,
                "video_url" => &mut form.video_url,
                _ => continue,
            };
            *slot = Some(field.text().await.map_err(ApiError::multipart)?);
        }
        Ok(form)
    }
}

/// Pick the input for a preset: an explicit URL, then the remote preset
/// bucket, then the local presets directory.
async fn resolve_preset_input(
    worker: &WorkerConfig,
    preset_id: &str,
    video_url: Option<&str>,
) -> ApiResult<InputRef> {
    if let Some(url) = video_url.filter(|u| !u.trim().is_empty()) {
        let url = validate_video_url(url).map_err(ApiError::bad_request)?;
        return Ok(InputRef::Remote(url));
    }

    if let Some(base) = &worker.preset_base_url {
        let url = Url::parse(&format!("{}/{}.mp4", base, preset_id))
            .map_err(|e| ApiError::internal(format!("invalid PRESET_BASE_URL: {}", e)))?;
        return Ok(InputRef::Remote(url));
    }

    let path = worker.presets_dir.join(format!("{}.mp4", preset_id));
    if !fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ApiError::not_found("Preset video not found"));
    }
    Ok(InputRef::Local(path))
}

/// Queue analysis of a preset video. Accepts url-encoded or multipart forms.
pub async fn process_preset(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<Json<SubmitResponse>> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let form = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        PresetForm::from_multipart(multipart).await?
    } else {
        let Form(form) = Form::<PresetForm>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        form
    };

    let preset_id = form
        .preset_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing preset_id field"))?;
    if !is_valid_preset_id(preset_id) {
        return Err(ApiError::bad_request("Invalid preset_id"));
    }
    let start = parse_start_gps(form.start_gps.as_deref())?;

    let input = resolve_preset_input(&state.worker, preset_id, form.video_url.as_deref()).await?;
    info!(preset_id = %preset_id, input = %input, "Preset analysis requested");

    let id = state.executor.submit(input, start).await?;
    Ok(Json(id.into()))
}

// =============================================================================
// Status
// =============================================================================

/// Current snapshot of a task. Unknown ids answer `{"status":"not_found"}`.
pub async fn status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    let view = state
        .executor
        .get_status(&TaskId::from_string(task_id))
        .await?;
    Ok(Json(view))
}
