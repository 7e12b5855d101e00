//! Frame-rate reduction before upload.
//!
//! Inline video payloads are size-limited, and a dashcam clip at 3 fps still
//! shows every parking spot. Keyframes are re-encoded to match the new rate
//! so timestamps in the inference response line up with extractable frames.

use std::path::Path;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Encoding settings for [`downsample_video`].
#[derive(Debug, Clone)]
pub struct DownsampleOptions {
    pub fps: u32,
    pub crf: u8,
    pub preset: String,
}

impl Default for DownsampleOptions {
    fn default() -> Self {
        Self {
            fps: 3,
            crf: 24,
            preset: "fast".to_string(),
        }
    }
}

impl DownsampleOptions {
    fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .frame_rate(self.fps)
            .video_codec("libx264")
            .crf(self.crf)
            .preset(self.preset.clone())
            .no_audio()
    }
}

/// Re-encode `input` to `output` at a reduced frame rate without audio.
pub async fn downsample_video(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: &DownsampleOptions,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> MediaResult<()> {
    let input = input.as_ref();
    let output = output.as_ref();

    info!(
        "Optimizing video to {} FPS: {} -> {}",
        options.fps,
        input.display(),
        output.display()
    );

    let cmd = options.command(input, output);
    let mut runner = FfmpegRunner::new();
    if let Some(rx) = cancel_rx {
        runner = runner.with_cancel(rx);
    }

    runner
        .run_with_progress(&cmd, |p| {
            debug!(frame = p.frame, out_time_ms = p.out_time_ms, "downsample progress");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_args() {
        let cmd = DownsampleOptions::default()
            .command(Path::new("in.mov"), Path::new("processed_in.mp4"));
        let args = cmd.build_args().join(" ");

        assert!(args.contains("-i in.mov -r 3 -c:v libx264 -crf 24 -preset fast -an processed_in.mp4"));
    }
}
