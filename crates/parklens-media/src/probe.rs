//! Duration lookup through FFprobe.
//!
//! Only the duration matters here: it sizes the synthesized GPS log. Some
//! dashcam containers omit the format duration, so the first video stream's
//! duration is used as a fallback.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeEntry>,
    #[serde(default)]
    streams: Vec<ProbeEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeEntry {
    duration: Option<String>,
}

impl ProbeEntry {
    fn seconds(&self) -> Option<f64> {
        self.duration
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
    }
}

/// Video duration in seconds.
pub async fn get_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(check_ffprobe()?)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "format=duration:stream=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            path: path.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let duration = parse_duration(&output.stdout)?
        .ok_or_else(|| MediaError::UnknownDuration(path.to_path_buf()))?;
    debug!("{} is {:.2}s long", path.display(), duration);
    Ok(duration)
}

fn parse_duration(stdout: &[u8]) -> MediaResult<Option<f64>> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)?;
    Ok(probe
        .format
        .as_ref()
        .and_then(ProbeEntry::seconds)
        .or_else(|| probe.streams.iter().find_map(ProbeEntry::seconds)))
}
