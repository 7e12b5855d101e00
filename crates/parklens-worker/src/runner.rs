//! Analysis runner abstraction.
//!
//! A runner turns one input video into `analysis_<basename>.json` inside the
//! task's working directory. The executor only depends on [`AnalysisRunner`];
//! the default implementation spawns the `parklens-analyze` CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use parklens_media::MediaError;
use parklens_models::{GpsPoint, TaskId};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::RunnerError;

/// Everything a runner needs for one task.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task_id: TaskId,
    /// Absolute path of the input video
    pub video_path: PathBuf,
    /// Per-task working directory; all runner output lands here
    pub work_dir: PathBuf,
    pub start: GpsPoint,
    pub end: GpsPoint,
}

impl RunRequest {
    /// Where the runner writes its result: `analysis_<basename(video)>.json`.
    pub fn result_path(&self) -> PathBuf {
        result_path_for(&self.work_dir, &self.video_path)
    }

    /// Where a downsampled copy of the input is written, if one is made.
    pub fn processed_video_path(&self) -> PathBuf {
        processed_video_path_for(&self.work_dir, &self.video_path)
    }
}

pub fn result_path_for(work_dir: &Path, video: &Path) -> PathBuf {
    let name = video
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    work_dir.join(format!("analysis_{}.json", name))
}

pub fn processed_video_path_for(work_dir: &Path, video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    work_dir.join(format!("processed_{}.mp4", stem))
}

/// Output of a successful run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Diagnostic text the runner emitted, kept for failure details
    pub diagnostics: String,
}

#[async_trait]
pub trait AnalysisRunner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the analysis. Implementations must stop promptly once `cancel`
    /// reads `true` and return [`RunnerError::Cancelled`].
    async fn run(
        &self,
        request: &RunRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunOutput, RunnerError>;
}

/// Resolves once `rx` reads `true`. Never resolves if the sender is gone.
pub async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending::<()>().await;
        }
    }
}

/// Runs an external analyzer as a child process.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    program: String,
    prefix_args: Vec<String>,
    model: String,
}

impl SubprocessRunner {
    /// `command` is split on whitespace into the program and its leading
    /// arguments, e.g. `"python analyze_with_gemini.py"`.
    pub fn new(command: &str, model: impl Into<String>) -> Result<Self, RunnerError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| RunnerError::spawn("runner command is empty"))?;

        Ok(Self {
            program,
            prefix_args: parts.collect(),
            model: model.into(),
        })
    }

    fn args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = self.prefix_args.clone();
        args.extend([
            "--video".to_string(),
            request.video_path.to_string_lossy().into_owned(),
            "--start-gps".to_string(),
            request.start.to_string(),
            "--end-gps".to_string(),
            request.end.to_string(),
            "--model".to_string(),
            self.model.clone(),
        ]);
        args
    }
}

#[async_trait]
impl AnalysisRunner for SubprocessRunner {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn run(
        &self,
        request: &RunRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunOutput, RunnerError> {
        let args = self.args(request);
        debug!(task_id = %request.task_id, "Running {} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::spawn(format!("{}: {}", self.program, e)))?;

        let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

        let status = match parklens_media::wait_child(&mut child, Some(cancel), None).await {
            Ok(status) => status,
            Err(MediaError::Cancelled) => return Err(RunnerError::Cancelled),
            Err(MediaError::Io(e)) => return Err(RunnerError::Io(e)),
            Err(e) => return Err(RunnerError::spawn(e.to_string())),
        };

        let stdout = match stdout {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            warn!(
                task_id = %request.task_id,
                exit_code = ?status.code(),
                "Runner exited unsuccessfully"
            );
            return Err(RunnerError::Failed {
                exit_code: status.code(),
                diagnostics: stderr,
            });
        }

        info!(task_id = %request.task_id, "Runner finished");
        Ok(RunOutput {
            diagnostics: if stderr.trim().is_empty() { stdout } else { stderr },
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!("Failed to read runner output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
