//! Analysis task records.
//!
//! A [`Task`] is the lifecycle record of one submitted analysis request. Its
//! state only moves forward (`pending -> processing -> completed | failed`),
//! and the result or failure payload lives inside the terminal state variant,
//! so a completed task without a result (or a failed task without an error)
//! cannot be represented.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::analysis::AnalysisResult;
use crate::error::{ModelError, ModelResult};

/// Unique identifier for an analysis task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where the video to analyze comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum InputRef {
    /// A file already on the local filesystem.
    Local(PathBuf),
    /// A remote URL that must be fetched before analysis.
    Remote(Url),
}

impl InputRef {
    /// Interpret a user-supplied reference: `http(s)` URLs are remote,
    /// everything else is a local path.
    pub fn parse(s: &str) -> ModelResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ModelError::InvalidInput("empty input reference".to_string()));
        }

        if s.starts_with("http://") || s.starts_with("https://") {
            let url = Url::parse(s)
                .map_err(|e| ModelError::InvalidInput(format!("invalid URL '{}': {}", s, e)))?;
            return Ok(Self::Remote(url));
        }

        Ok(Self::Local(PathBuf::from(s)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Kind of durable file published for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Re-encoded (downsampled) video produced by the runner
    ProcessedVideo,
    /// The original input video, published when no processed video exists
    SourceVideo,
    /// The normalized result description
    ResultJson,
    /// A frame extracted for one detection
    Frame,
}

/// A durable file reference scoped under a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Storage key, always prefixed with the owning task ID.
    pub key: String,
    /// URL path clients use to fetch the artifact.
    pub url: String,
}

/// Payload of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub analysis: AnalysisResult,
    pub video_url: String,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

/// Machine-readable reason a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Remote input could not be retrieved
    FetchFailed,
    /// The analysis runner exited abnormally
    RunnerFailed,
    /// The runner succeeded but left no usable result
    NoResult,
    /// Relocating runner output into durable storage failed
    MaterializationFailed,
    /// The run was cancelled (shutdown)
    Cancelled,
    /// The run exceeded the configured timeout
    TimedOut,
    /// Any other fault caught at the executor boundary
    Internal,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchFailed => "fetch_failed",
            Self::RunnerFailed => "runner_failed",
            Self::NoResult => "no_result",
            Self::MaterializationFailed => "materialization_failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Internal => "internal",
        }
    }
}

/// Payload of a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub cause: FailureCause,
    /// Human-readable cause
    pub error: String,
    /// Diagnostic detail, typically the runner's captured stderr
    pub details: Option<String>,
}

impl TaskFailure {
    pub fn new(cause: FailureCause, error: impl Into<String>) -> Self {
        Self {
            cause,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        self.details = if details.is_empty() { None } else { Some(details) };
        self
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    /// Created, waiting for the executor
    Pending,
    /// The analysis runner has been launched
    Processing,
    /// Finished with a materialized result
    Completed(Box<TaskResult>),
    /// Finished with an error
    Failed(TaskFailure),
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Completed(_) => "completed",
            TaskState::Failed(_) => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed(_) | TaskState::Failed(_))
    }

    fn rank(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Processing => 1,
            TaskState::Completed(_) | TaskState::Failed(_) => 2,
        }
    }
}

/// The lifecycle record of one submitted analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(flatten)]
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: TaskState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Progress percentage reported to polling clients.
    pub fn progress(&self) -> u8 {
        match self.state {
            TaskState::Completed(_) => 100,
            _ => 0,
        }
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match &self.state {
            TaskState::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match &self.state {
            TaskState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Move to `next`, rejecting anything that is not a strict step forward.
    pub fn transition(&mut self, next: TaskState) -> ModelResult<()> {
        if next.rank() <= self.state.rank() {
            return Err(ModelError::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the runner as launched.
    pub fn start_processing(&mut self) -> ModelResult<()> {
        self.transition(TaskState::Processing)
    }

    /// Mark the task completed with its result.
    pub fn complete(&mut self, result: TaskResult) -> ModelResult<()> {
        self.transition(TaskState::Completed(Box::new(result)))
    }

    /// Mark the task failed.
    pub fn fail(&mut self, failure: TaskFailure) -> ModelResult<()> {
        self.transition(TaskState::Failed(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> TaskResult {
        TaskResult {
            analysis: AnalysisResult::default(),
            video_url: "/artifacts/t/video.mp4".to_string(),
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_task_id_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert_eq!(TaskId::from(a.as_str()), a);
    }

    #[test]
    fn test_task_lifecycle() {
        let mut task = Task::new(TaskId::new());
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.result().is_none());
        assert!(task.failure().is_none());

        task.start_processing().unwrap();
        assert_eq!(task.state.as_str(), "processing");
        assert_eq!(task.progress(), 0);

        task.complete(sample_result()).unwrap();
        assert!(task.is_terminal());
        assert_eq!(task.progress(), 100);
        assert!(task.result().is_some());
        assert!(task.failure().is_none());
    }

    #[test]
    fn test_transitions_only_move_forward() {
        let mut task = Task::new(TaskId::new());
        task.start_processing().unwrap();
        assert!(task.start_processing().is_err());
        assert!(task.transition(TaskState::Pending).is_err());

        task.fail(TaskFailure::new(FailureCause::RunnerFailed, "boom"))
            .unwrap();
        assert!(task.complete(sample_result()).is_err());
        assert!(task.fail(TaskFailure::new(FailureCause::Internal, "again")).is_err());
        assert_eq!(task.failure().unwrap().error, "boom");
    }

    #[test]
    fn test_pending_can_fail_directly() {
        let mut task = Task::new(TaskId::new());
        task.fail(TaskFailure::new(FailureCause::FetchFailed, "fetch failed"))
            .unwrap();
        assert_eq!(task.state.as_str(), "failed");
    }

    #[test]
    fn test_task_serde_roundtrip_keeps_state_payload() {
        let mut task = Task::new(TaskId::from("abc"));
        task.fail(
            TaskFailure::new(FailureCause::RunnerFailed, "analysis runner failed")
                .with_details("Traceback: ..."),
        )
        .unwrap();

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["cause"], "runner_failed");
        assert_eq!(json["details"], "Traceback: ...");

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_empty_details_become_none() {
        let failure = TaskFailure::new(FailureCause::NoResult, "no result produced").with_details("");
        assert!(failure.details.is_none());
    }

    #[test]
    fn test_input_ref_parse() {
        assert!(InputRef::parse("https://example.com/v.mp4").unwrap().is_remote());
        assert_eq!(
            InputRef::parse("uploads/a.mp4").unwrap(),
            InputRef::Local(PathBuf::from("uploads/a.mp4"))
        );
        assert!(InputRef::parse("  ").is_err());
        assert!(InputRef::parse("http://").is_err());
    }

    #[test]
    fn test_input_ref_serde() {
        let remote = InputRef::parse("https://cdn.example.com/presets/a.mp4").unwrap();
        let json = serde_json::to_value(&remote).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "remote", "location": "https://cdn.example.com/presets/a.mp4"})
        );
        assert_eq!(serde_json::from_value::<InputRef>(json).unwrap(), remote);
    }
}
