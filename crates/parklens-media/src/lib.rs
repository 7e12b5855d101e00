//! FFmpeg CLI wrapper for video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeout support via tokio
//! - Downsampling before upload to the inference API
//! - Frame extraction for detected spots
//! - Cross-device file moves

pub mod command;
pub mod downsample;
pub mod error;
pub mod frames;
pub mod fs_utils;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, wait_child, FfmpegCommand, FfmpegRunner};
pub use downsample::{downsample_video, DownsampleOptions};
pub use error::{MediaError, MediaResult};
pub use frames::extract_frame;
pub use fs_utils::{copy_file, move_file};
pub use probe::get_duration;
pub use progress::FfmpegProgress;
