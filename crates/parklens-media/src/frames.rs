//! Still frame extraction.

use std::path::Path;

use tokio::sync::watch;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Write the frame at `at_secs` of `video_path` to `output_path` as JPEG.
pub async fn extract_frame(
    video_path: impl AsRef<Path>,
    at_secs: f64,
    output_path: impl AsRef<Path>,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> MediaResult<()> {
    let cmd = frame_command(video_path.as_ref(), at_secs, output_path.as_ref());

    let mut runner = FfmpegRunner::new();
    if let Some(rx) = cancel_rx {
        runner = runner.with_cancel(rx);
    }
    runner.run(&cmd).await
}

fn frame_command(video_path: &Path, at_secs: f64, output_path: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .seek(at_secs.max(0.0))
        .single_frame()
        .jpeg_quality(2)
        .log_level("error")
}
