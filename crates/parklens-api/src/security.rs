//! Input validation for submission endpoints.

use url::Url;

/// Maximum URL length accepted for `video_url`.
const MAX_URL_LENGTH: usize = 2048;

/// Maximum preset id length.
pub const MAX_PRESET_ID_LENGTH: usize = 64;

/// Validate a caller-supplied remote video URL.
///
/// Only absolute `http`/`https` URLs with a host and without embedded
/// credentials are accepted.
pub fn validate_video_url(url: &str) -> Result<Url, String> {
    let url = url.trim();
    if url.is_empty() {
        return Err("video_url cannot be empty".to_string());
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(format!(
            "video_url exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        ));
    }

    let parsed = Url::parse(url).map_err(|e| format!("Invalid video_url: {}", e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(format!(
                "Invalid protocol '{}'. Only HTTP and HTTPS are allowed.",
                scheme
            ))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("video_url must have a host".to_string());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err("video_url must not embed credentials".to_string());
    }

    Ok(parsed)
}

/// Preset ids: `[A-Za-z0-9_-]{1,64}`.
pub fn is_valid_preset_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_PRESET_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extension (with leading dot) to store an upload under, taken from the
/// client file name. Anything unusual falls back to `.mp4`.
pub fn upload_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| ".mp4".to_string())
}
