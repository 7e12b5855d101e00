//! Artifact proxy for object-store backends.
//!
//! With the local backend artifacts are served straight from disk by
//! `ServeDir`; this handler covers every other backend.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Stream an artifact, honoring a single `Range` request.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((task_id, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let key = format!("{}/{}", task_id, path.trim_start_matches('/'));
    let range = headers.get(RANGE).and_then(|v| v.to_str().ok());
    debug!(key = %key, range = ?range, "Serving artifact");

    let object = state.artifacts.read_range(&key, range).await?;

    let status = if object.content_range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, object.content_type)
        .header(CONTENT_LENGTH, object.data.len())
        .header(ACCEPT_RANGES, "bytes")
        .header(CACHE_CONTROL, "public, max-age=3600");
    if let Some(content_range) = object.content_range {
        builder = builder.header(CONTENT_RANGE, content_range);
    }

    builder
        .body(Body::from(object.data))
        .map(IntoResponse::into_response)
        .map_err(|e| ApiError::internal(format!("failed to build response: {}", e)))
}
