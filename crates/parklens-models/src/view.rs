//! Client-facing task snapshot returned by the status endpoint.

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskState};

/// What `GET /status/{task_id}` renders.
///
/// Pending tasks are reported as processing with progress 0 so clients only
/// ever poll against three live states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskView {
    NotFound,
    Processing {
        progress: u8,
    },
    Completed {
        result: serde_json::Value,
        video_url: String,
    },
    Failed {
        error: String,
        details: Option<String>,
    },
}

impl TaskView {
    /// Snapshot of a record, or [`TaskView::NotFound`] when absent.
    pub fn from_task(task: Option<&Task>) -> Self {
        let Some(task) = task else {
            return Self::NotFound;
        };

        match &task.state {
            TaskState::Pending | TaskState::Processing => Self::Processing {
                progress: task.progress(),
            },
            TaskState::Completed(result) => Self::Completed {
                result: result.analysis.to_value(),
                video_url: result.video_url.clone(),
            },
            TaskState::Failed(failure) => Self::Failed {
                error: failure.error.clone(),
                details: failure.details.clone(),
            },
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Processing { .. } => "processing",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self::from_task(Some(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisResult;
    use crate::task::{FailureCause, TaskFailure, TaskId, TaskResult};
    use serde_json::json;

    #[test]
    fn test_not_found() {
        let view = TaskView::from_task(None);
        assert_eq!(serde_json::to_value(&view).unwrap(), json!({"status": "not_found"}));
    }

    #[test]
    fn test_pending_renders_as_processing() {
        let task = Task::new(TaskId::new());
        assert_eq!(
            serde_json::to_value(TaskView::from(&task)).unwrap(),
            json!({"status": "processing", "progress": 0})
        );
    }

    #[test]
    fn test_completed_view() {
        let mut task = Task::new(TaskId::from("t1"));
        task.start_processing().unwrap();
        let analysis = AnalysisResult::from_value(json!({
            "spots": [{"id": 1, "lat": 1.0, "lng": 2.0}],
            "path": []
        }))
        .unwrap();
        task.complete(TaskResult {
            analysis,
            video_url: "/artifacts/t1/video.mp4".to_string(),
            artifacts: Vec::new(),
        })
        .unwrap();

        let value = serde_json::to_value(TaskView::from(&task)).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["video_url"], "/artifacts/t1/video.mp4");
        assert_eq!(value["result"]["spots"][0]["lng"], 2.0);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failed_view_carries_null_details() {
        let mut task = Task::new(TaskId::new());
        task.fail(TaskFailure::new(FailureCause::FetchFailed, "fetch failed"))
            .unwrap();

        assert_eq!(
            serde_json::to_value(TaskView::from(&task)).unwrap(),
            json!({"status": "failed", "error": "fetch failed", "details": null})
        );
    }
}
