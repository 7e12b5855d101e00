//! Task executor.
//!
//! Owns the task registry, spawns one background execution per submission
//! and is the single place where a task reaches a terminal state.

use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parklens_models::{
    FailureCause, GpsPoint, InputRef, Task, TaskFailure, TaskId, TaskResult, TaskState, TaskView,
};
use parklens_storage::ArtifactStore;
use parklens_tasks::{
    InMemoryTaskStore, RedisStoreConfig, RedisTaskStore, TaskStore, TaskSweeper, TerminalTtl,
};
use tokio::fs;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use url::Url;

use crate::config::{RunnerMode, TaskStoreKind, WorkerConfig};
use crate::error::{RunnerError, WorkerError, WorkerResult};
use crate::gemini::GeminiClient;
use crate::logging::TaskLogger;
use crate::materializer::ResultMaterializer;
use crate::pipeline::GeminiRunner;
use crate::runner::{AnalysisRunner, RunOutput, RunRequest, SubprocessRunner};

/// Executor tuning taken from [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub work_dir: PathBuf,
    pub runner_timeout: Option<Duration>,
    pub end_gps_offset_deg: f64,
}

impl ExecutorSettings {
    /// Scratch directory for one task, removed once the task is terminal.
    pub fn task_work_dir(&self, task_id: &TaskId) -> PathBuf {
        self.work_dir.join(task_id.as_str())
    }
}

impl From<&WorkerConfig> for ExecutorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            runner_timeout: config.runner_timeout,
            end_gps_offset_deg: config.end_gps_offset_deg,
        }
    }
}

/// Submits analysis tasks and tracks them to completion.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn AnalysisRunner>,
    materializer: ResultMaterializer,
    http: reqwest::Client,
    settings: ExecutorSettings,
    shutdown: watch::Sender<bool>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn AnalysisRunner>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: ExecutorSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                runner,
                materializer: ResultMaterializer::new(artifacts),
                http: reqwest::Client::new(),
                settings,
                shutdown,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Build the task store and runner selected by `config`.
    pub fn from_config(config: &WorkerConfig, artifacts: Arc<dyn ArtifactStore>) -> WorkerResult<Self> {
        let store: Arc<dyn TaskStore> = match config.task_store {
            TaskStoreKind::Memory => Arc::new(InMemoryTaskStore::new()),
            TaskStoreKind::Redis => Arc::new(RedisTaskStore::new(RedisStoreConfig {
                redis_url: config.redis_url.clone(),
                ..RedisStoreConfig::from_env()
            })?),
        };

        let runner: Arc<dyn AnalysisRunner> = match config.runner_mode {
            RunnerMode::Subprocess => Arc::new(SubprocessRunner::new(
                &config.runner_command,
                config.gemini_model.clone(),
            )?),
            RunnerMode::Inline => {
                let api_key = config.gemini_api_key.clone().ok_or_else(|| {
                    WorkerError::config_error("GEMINI_API_KEY is required for the inline runner")
                })?;
                let client = GeminiClient::new(api_key).with_base_url(config.gemini_base_url.clone());
                Arc::new(GeminiRunner::new(
                    client,
                    config.gemini_model.clone(),
                    config.prompt_file.clone(),
                ))
            }
        };

        info!(
            "Task executor using {} store and {} runner",
            store.backend_name(),
            runner.name()
        );
        Ok(Self::new(store, runner, artifacts, ExecutorSettings::from(config)))
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    pub fn runner_name(&self) -> &'static str {
        self.inner.runner.name()
    }

    /// Number of executions that have not reached a terminal state yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Register a new task and start it in the background.
    ///
    /// Returns as soon as the pending record exists; the analysis itself is
    /// never awaited here.
    pub async fn submit(&self, input: InputRef, start: GpsPoint) -> WorkerResult<TaskId> {
        self.submit_with_id(TaskId::new(), input, start).await
    }

    /// Like [`submit`](Self::submit) with a caller-chosen id, used when the
    /// input was stored under the id before submission.
    pub async fn submit_with_id(
        &self,
        id: TaskId,
        input: InputRef,
        start: GpsPoint,
    ) -> WorkerResult<TaskId> {
        if *self.inner.shutdown.borrow() {
            return Err(WorkerError::ShuttingDown);
        }

        self.inner.store.insert(Task::new(id.clone())).await?;
        metrics::counter!("parklens_tasks_submitted_total").increment(1);
        info!(task_id = %id, input = %input, start = %start, "Task submitted");

        self.spawn_execution(id.clone(), input, start);
        Ok(id)
    }

    /// Current snapshot of a task; absent records render as not found.
    pub async fn get_status(&self, id: &TaskId) -> WorkerResult<TaskView> {
        let task = self.inner.store.get(id).await?;
        Ok(TaskView::from_task(task.as_ref()))
    }

    /// Spawn a sweeper evicting terminal records older than `ttl`. It stops
    /// on [`shutdown`](Self::shutdown).
    pub fn start_sweeper(&self, ttl: Duration, period: Duration) -> JoinHandle<()> {
        let sweeper = TaskSweeper::new(
            Arc::clone(&self.inner.store),
            Arc::new(TerminalTtl(ttl)),
            period,
        );
        let shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move { sweeper.run(shutdown).await })
    }

    /// Cancel in-flight runs and wait up to `timeout` for them to settle.
    /// Returns `true` when nothing is left running.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!("Shutting down executor ({} in flight)", self.in_flight());
        self.inner.shutdown.send_replace(true);

        let drained = tokio::time::timeout(timeout, async {
            loop {
                let idle = self.inner.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                "Executor shutdown timed out with {} tasks in flight",
                self.in_flight()
            );
        }
        drained
    }

    fn spawn_execution(&self, id: TaskId, input: InputRef, start: GpsPoint) {
        let inner = Arc::clone(&self.inner);
        inner.in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let _guard = InFlightGuard(Arc::clone(&inner));
            let span = TaskLogger::new(&id, "analysis").create_span();

            // Run on its own task so a panic surfaces as a JoinError here
            let execution = tokio::spawn(
                Arc::clone(&inner)
                    .execute(id.clone(), input, start)
                    .instrument(span),
            );

            let outcome = match execution.await {
                Ok(outcome) => outcome.map_err(|e| e.to_failure()),
                Err(join_error) => {
                    let details = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "execution aborted".to_string()
                    };
                    error!(task_id = %id, "Task execution panicked: {}", details);
                    Err(TaskFailure::new(FailureCause::Internal, "internal error").with_details(details))
                }
            };

            inner.finish(&id, outcome).await;
            inner.remove_work_dir(&id).await;
        });
    }
}

impl Inner {
    async fn execute(
        self: Arc<Self>,
        id: TaskId,
        input: InputRef,
        start: GpsPoint,
    ) -> WorkerResult<TaskResult> {
        let logger = TaskLogger::new(&id, "analysis");

        self.store.transition(&id, TaskState::Processing).await?;
        logger.log_start(&input.to_string());

        let work_dir = std::path::absolute(self.settings.task_work_dir(&id))?;
        fs::create_dir_all(&work_dir).await?;

        let video_path = match input {
            InputRef::Remote(url) => {
                let dest = work_dir.join(remote_file_name(&url));
                parklens_storage::fetch_remote(&self.http, &url, &dest)
                    .await
                    .map_err(|e| WorkerError::fetch(e.to_string()))?;
                logger.log_progress("remote input fetched");
                dest
            }
            InputRef::Local(path) => {
                if !fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(WorkerError::fetch(format!(
                        "input {} does not exist",
                        path.display()
                    )));
                }
                std::path::absolute(&path)?
            }
        };

        let request = RunRequest {
            task_id: id.clone(),
            video_path,
            work_dir,
            start,
            end: start.offset(self.settings.end_gps_offset_deg),
        };

        let output = self.run_with_limits(&request).await?;
        logger.log_progress("runner finished");

        let analysis = match self.materializer.read_result(&request).await {
            Ok(analysis) => analysis,
            Err(e) if output.diagnostics.trim().is_empty() => return Err(e),
            Err(e) => return Err(e.with_diagnostics(output.diagnostics)),
        };

        self.materializer.materialize(&request, analysis).await
    }

    async fn run_with_limits(
        &self,
        request: &RunRequest,
    ) -> Result<RunOutput, RunnerError> {
        let started = Instant::now();
        let run = self.runner.run(request, self.shutdown.subscribe());

        // Dropping the run future on timeout kills any child process
        let outcome = match self.settings.runner_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RunnerError::TimedOut(limit)),
            },
            None => run.await,
        };

        let elapsed = started.elapsed();
        metrics::histogram!("parklens_runner_duration_seconds", "runner" => self.runner.name())
            .record(elapsed.as_secs_f64());
        debug!(task_id = %request.task_id, "Runner took {:?}", elapsed);
        outcome
    }

    async fn finish(&self, id: &TaskId, outcome: Result<TaskResult, TaskFailure>) {
        let logger = TaskLogger::new(id, "analysis");

        let next = match outcome {
            Ok(result) => {
                metrics::counter!("parklens_tasks_completed_total").increment(1);
                logger.log_completion(&format!("{} spots", result.analysis.spots.len()));
                TaskState::Completed(Box::new(result))
            }
            Err(failure) => {
                metrics::counter!("parklens_tasks_failed_total", "cause" => failure.cause.as_str())
                    .increment(1);
                logger.log_error(&format!("{} ({})", failure.error, failure.cause.as_str()));
                TaskState::Failed(failure)
            }
        };

        if let Err(e) = self.store.transition(id, next).await {
            error!(task_id = %id, "Failed to record terminal state: {}", e);
        }
    }

    /// Drop the task's scratch files. Published artifacts were already
    /// moved out by the materializer.
    async fn remove_work_dir(&self, id: &TaskId) {
        let dir = self.settings.task_work_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(task_id = %id, "Removed work dir {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(task_id = %id, "Failed to remove work dir {}: {}", dir.display(), e),
        }
    }
}

struct InFlightGuard(Arc<Inner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.idle.notify_waiters();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic".to_string()
    }
}

/// Local file name for a fetched input: the URL's last path segment when it
/// is a plain file name, `input.mp4` otherwise.
fn remote_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| {
            !name.is_empty()
                && name.len() <= 128
                && !name.starts_with('.')
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        })
        .map(str::to_string)
        .unwrap_or_else(|| "input.mp4".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parklens_storage::{
        ArtifactObject, LocalArtifactStore, StorageError, StorageResult,
    };
    use parklens_tasks::InMemoryTaskStore;
    use std::path::Path;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Writes a result with two frames after an optional delay.
    struct WritingRunner {
        delay: Duration,
    }

    #[async_trait]
    impl AnalysisRunner for WritingRunner {
        fn name(&self) -> &'static str {
            "writing"
        }

        async fn run(
            &self,
            request: &RunRequest,
            _cancel: watch::Receiver<bool>,
        ) -> Result<RunOutput, RunnerError> {
            tokio::time::sleep(self.delay).await;
            for n in 1..=2 {
                fs::write(request.work_dir.join(format!("frame_{}.jpg", n)), request.task_id.as_str())
                    .await?;
            }
            let result = json!({
                "spots": [
                    {"id": 1, "timestamp": 1, "lat": request.start.lat, "lon": request.start.lon, "frame": "frame_1.jpg"},
                    {"id": 2, "timestamp": 2, "lat": request.end.lat, "lon": request.end.lon, "frame": "frame_2.jpg"}
                ],
                "gps_path": []
            });
            fs::write(request.result_path(), result.to_string()).await?;
            Ok(RunOutput::default())
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl AnalysisRunner for FailingRunner {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self, _: &RunRequest, _: watch::Receiver<bool>) -> Result<RunOutput, RunnerError> {
            Err(RunnerError::Failed {
                exit_code: Some(1),
                diagnostics: "Error: GEMINI_API_KEY not found".to_string(),
            })
        }
    }

    struct SilentRunner;

    #[async_trait]
    impl AnalysisRunner for SilentRunner {
        fn name(&self) -> &'static str {
            "silent"
        }

        async fn run(&self, _: &RunRequest, _: watch::Receiver<bool>) -> Result<RunOutput, RunnerError> {
            Ok(RunOutput {
                diagnostics: "Failed with status 429".to_string(),
            })
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl AnalysisRunner for PanickingRunner {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn run(&self, _: &RunRequest, _: watch::Receiver<bool>) -> Result<RunOutput, RunnerError> {
            panic!("runner exploded")
        }
    }

    /// Blocks until cancelled.
    struct BlockingRunner;

    #[async_trait]
    impl AnalysisRunner for BlockingRunner {
        fn name(&self) -> &'static str {
            "blocking"
        }

        async fn run(&self, _: &RunRequest, cancel: watch::Receiver<bool>) -> Result<RunOutput, RunnerError> {
            crate::runner::cancelled(cancel).await;
            Err(RunnerError::Cancelled)
        }
    }

    /// Accepts nothing: every write is rejected.
    struct ReadOnlyStore;

    #[async_trait]
    impl ArtifactStore for ReadOnlyStore {
        fn backend_name(&self) -> &'static str {
            "read-only"
        }

        async fn put_file(&self, _: &Path, key: &str) -> StorageResult<()> {
            Err(StorageError::UploadFailed(format!("{}: bucket is read-only", key)))
        }

        async fn put_bytes(&self, _: Vec<u8>, key: &str, _: &str) -> StorageResult<()> {
            Err(StorageError::UploadFailed(format!("{}: bucket is read-only", key)))
        }

        async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn read_range(&self, key: &str, _: Option<&str>) -> StorageResult<ArtifactObject> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn exists(&self, _: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn check_connectivity(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        executor: TaskExecutor,
        video: PathBuf,
    }

    async fn harness(runner: Arc<dyn AnalysisRunner>, runner_timeout: Option<Duration>) -> Harness {
        let dir = TempDir::new().unwrap();
        let artifacts = LocalArtifactStore::new(dir.path().join("artifacts")).await.unwrap();
        harness_with_store(dir, runner, Arc::new(artifacts), runner_timeout).await
    }

    async fn harness_with_store(
        dir: TempDir,
        runner: Arc<dyn AnalysisRunner>,
        artifacts: Arc<dyn ArtifactStore>,
        runner_timeout: Option<Duration>,
    ) -> Harness {
        let video = dir.path().join("uploads").join("drive.mp4");
        fs::create_dir_all(video.parent().unwrap()).await.unwrap();
        fs::write(&video, b"video").await.unwrap();

        let executor = TaskExecutor::new(
            Arc::new(InMemoryTaskStore::new()),
            runner,
            artifacts,
            ExecutorSettings {
                work_dir: dir.path().join("work"),
                runner_timeout,
                end_gps_offset_deg: 0.005,
            },
        );
        Harness { dir, executor, video }
    }

    fn start() -> GpsPoint {
        GpsPoint::new(37.77, -122.42).unwrap()
    }

    async fn wait_terminal(executor: &TaskExecutor, id: &TaskId) -> TaskView {
        for _ in 0..500 {
            let view = executor.get_status(id).await.unwrap();
            if matches!(view, TaskView::Completed { .. } | TaskView::Failed { .. }) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_submit_returns_before_runner_finishes() {
        let h = harness(Arc::new(WritingRunner { delay: Duration::from_millis(300) }), None).await;

        let begin = Instant::now();
        let id = h
            .executor
            .submit(InputRef::Local(h.video.clone()), start())
            .await
            .unwrap();
        assert!(begin.elapsed() < Duration::from_millis(300));
        assert!(matches!(
            h.executor.get_status(&id).await.unwrap(),
            TaskView::Processing { progress: 0 }
        ));

        match wait_terminal(&h.executor, &id).await {
            TaskView::Completed { result, video_url } => {
                assert_eq!(video_url, format!("/artifacts/{}/source.mp4", id));
                let spots = result["spots"].as_array().unwrap();
                assert_eq!(spots.len(), 2);
                for spot in spots {
                    let frame = spot["frame"].as_str().unwrap();
                    assert!(frame.starts_with(&format!("/artifacts/{}/frames/{}_", id, id)));
                    let on_disk = h
                        .dir
                        .path()
                        .join("artifacts")
                        .join(frame.trim_start_matches("/artifacts/"));
                    assert!(on_disk.exists());
                }
                assert!((spots[1]["lat"].as_f64().unwrap() - 37.775).abs() < 1e-9);
                assert!(result.get("path").is_some());
            }
            other => panic!("unexpected view: {other:?}"),
        }
        assert_eq!(h.executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failing_runner_records_details() {
        let h = harness(Arc::new(FailingRunner), None).await;
        let id = h
            .executor
            .submit(InputRef::Local(h.video.clone()), start())
            .await
            .unwrap();

        assert_eq!(
            wait_terminal(&h.executor, &id).await,
            TaskView::Failed {
                error: "analysis runner failed".to_string(),
                details: Some("Error: GEMINI_API_KEY not found".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_result_is_no_result_with_diagnostics() {
        let h = harness(Arc::new(SilentRunner), None).await;
        let id = h
            .executor
            .submit(InputRef::Local(h.video.clone()), start())
            .await
            .unwrap();

        assert_eq!(
            wait_terminal(&h.executor, &id).await,
            TaskView::Failed {
                error: "no result produced".to_string(),
                details: Some("Failed with status 429".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let h = harness(Arc::new(PanickingRunner), None).await;
        let id = h
            .executor
            .submit(InputRef::Local(h.video.clone()), start())
            .await
            .unwrap();

        let view = wait_terminal(&h.executor, &id).await;
        assert_eq!(
            view,
            TaskView::Failed {
                error: "internal error".to_string(),
                details: Some("runner exploded".to_string()),
            }
        );
        let task = h.executor.store().get(&id).await.unwrap().unwrap();
        assert_eq!(task.failure().unwrap().cause, FailureCause::Internal);
    }

    #[tokio::test]
    async fn test_remote_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let h = harness(Arc::new(WritingRunner { delay: Duration::ZERO }), None).await;
        let url = Url::parse(&format!("{}/presets/downtown.mp4", server.uri())).unwrap();
        let id = h.executor.submit(InputRef::Remote(url), start()).await.unwrap();

        match wait_terminal(&h.executor, &id).await {
            TaskView::Failed { error, .. } => assert_eq!(error, "fetch failed"),
            other => panic!("unexpected view: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_fetch_then_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote-video".to_vec()))
            .mount(&server)
            .await;

        let h = harness(Arc::new(WritingRunner { delay: Duration::ZERO }), None).await;
        let url = Url::parse(&format!("{}/presets/downtown.mp4", server.uri())).unwrap();
        let id = h.executor.submit(InputRef::Remote(url), start()).await.unwrap();

        match wait_terminal(&h.executor, &id).await {
            TaskView::Completed { video_url, .. } => {
                assert_eq!(video_url, format!("/artifacts/{}/source.mp4", id));
                let published = h
                    .dir
                    .path()
                    .join("artifacts")
                    .join(id.as_str())
                    .join("source.mp4");
                assert_eq!(fs::read(published).await.unwrap(), b"remote-video");
            }
            other => panic!("unexpected view: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_materialization_failure_is_terminal() {
        let dir = TempDir::new().unwrap();
        let h = harness_with_store(
            dir,
            Arc::new(WritingRunner { delay: Duration::ZERO }),
            Arc::new(ReadOnlyStore),
            None,
        )
        .await;
        let id = h
            .executor
            .submit(InputRef::Local(h.video.clone()), start())
            .await
            .unwrap();

        match wait_terminal(&h.executor, &id).await {
            TaskView::Failed { error, details } => {
                assert_eq!(error, "materialization failed");
                assert!(details.unwrap().contains("bucket is read-only"));
            }
            other => panic!("unexpected view: {other:?}"),
        }
        let task = h.executor.store().get(&id).await.unwrap().unwrap();
        assert_eq!(task.failure().unwrap().cause, FailureCause::MaterializationFailed);
    }

    #[tokio::test]
    async fn test_work_dir_removed_after_terminal_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let h = harness(Arc::new(FailingRunner), None).await;
        let url = Url::parse(&format!("{}/presets/big.mp4", server.uri())).unwrap();
        let failed = h.executor.submit(InputRef::Remote(url), start()).await.unwrap();
        assert!(matches!(
            wait_terminal(&h.executor, &failed).await,
            TaskView::Failed { .. }
        ));

        let h_ok = harness(Arc::new(WritingRunner { delay: Duration::ZERO }), None).await;
        let completed = h_ok
            .executor
            .submit(InputRef::Local(h_ok.video.clone()), start())
            .await
            .unwrap();
        assert!(matches!(
            wait_terminal(&h_ok.executor, &completed).await,
            TaskView::Completed { .. }
        ));

        // Cleanup runs right after the terminal write
        for _ in 0..100 {
            if h.executor.in_flight() == 0 && h_ok.executor.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!h.dir.path().join("work").join(failed.as_str()).exists());
        assert!(!h_ok.dir.path().join("work").join(completed.as_str()).exists());

        // Local inputs and published artifacts stay
        assert!(h_ok.video.exists());
        assert!(h_ok
            .dir
            .path()
            .join("artifacts")
            .join(completed.as_str())
            .join("result.json")
            .exists());
    }

    #[tokio::test]
    async fn test_start_near_pole_gets_valid_end() {
        let h = harness(Arc::new(WritingRunner { delay: Duration::ZERO }), None).await;
        let start = GpsPoint::new(89.998, 179.999).unwrap();
        let id = h
            .executor
            .submit(InputRef::Local(h.video.clone()), start)
            .await
            .unwrap();

        let TaskView::Completed { result, .. } = wait_terminal(&h.executor, &id).await else {
            panic!("task {} did not complete", id);
        };
        let end = &result["spots"][1];
        let lat = end["lat"].as_f64().unwrap();
        let lng = end["lng"].as_f64().unwrap();
        assert!(GpsPoint::new(lat, lng).is_ok(), "{},{}", lat, lng);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_do_not_share_artifacts() {
        let h = harness(Arc::new(WritingRunner { delay: Duration::from_millis(20) }), None).await;

        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(
                h.executor
                    .submit(InputRef::Local(h.video.clone()), start())
                    .await
                    .unwrap(),
            );
        }

        for id in &ids {
            let TaskView::Completed { result, .. } = wait_terminal(&h.executor, id).await else {
                panic!("task {} did not complete", id);
            };
            for spot in result["spots"].as_array().unwrap() {
                let frame = spot["frame"].as_str().unwrap();
                let path = h
                    .dir
                    .path()
                    .join("artifacts")
                    .join(frame.trim_start_matches("/artifacts/"));
                // Each stub frame contains the id of the task that wrote it
                assert_eq!(fs::read_to_string(path).await.unwrap(), id.as_str());
            }
        }
    }

    #[tokio::test]
    async fn test_runner_timeout() {
        let h = harness(Arc::new(BlockingRunner), Some(Duration::from_millis(50))).await;
        let id = h
            .executor
            .submit(InputRef::Local(h.video.clone()), start())
            .await
            .unwrap();

        let task = {
            wait_terminal(&h.executor, &id).await;
            h.executor.store().get(&id).await.unwrap().unwrap()
        };
        assert_eq!(task.failure().unwrap().cause, FailureCause::TimedOut);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_runs() {
        let h = harness(Arc::new(BlockingRunner), None).await;
        let id = h
            .executor
            .submit(InputRef::Local(h.video.clone()), start())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.executor.shutdown(Duration::from_secs(5)).await);
        let task = h.executor.store().get(&id).await.unwrap().unwrap();
        assert_eq!(task.failure().unwrap().cause, FailureCause::Cancelled);

        assert!(matches!(
            h.executor
                .submit(InputRef::Local(h.video.clone()), start())
                .await,
            Err(WorkerError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let h = harness(Arc::new(FailingRunner), None).await;
        assert_eq!(
            h.executor.get_status(&TaskId::from("nope")).await.unwrap(),
            TaskView::NotFound
        );
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(LocalArtifactStore::new(dir.path()).await.unwrap());

        let executor = TaskExecutor::from_config(&WorkerConfig::default(), artifacts.clone()).unwrap();
        assert_eq!(executor.runner_name(), "subprocess");
        assert_eq!(executor.store().backend_name(), "memory");

        let inline = WorkerConfig {
            runner_mode: RunnerMode::Inline,
            ..WorkerConfig::default()
        };
        assert!(matches!(
            TaskExecutor::from_config(&inline, artifacts.clone()),
            Err(WorkerError::ConfigError(_))
        ));

        let inline = WorkerConfig {
            gemini_api_key: Some("k".to_string()),
            ..inline
        };
        let executor = TaskExecutor::from_config(&inline, artifacts).unwrap();
        assert_eq!(executor.runner_name(), "inline");
    }

    #[test]
    fn test_remote_file_name() {
        let url = Url::parse("https://bucket.example.com/presets/downtown.mp4").unwrap();
        assert_eq!(remote_file_name(&url), "downtown.mp4");
        let url = Url::parse("https://bucket.example.com/").unwrap();
        assert_eq!(remote_file_name(&url), "input.mp4");
        let url = Url::parse("https://bucket.example.com/a/..%2Fx").unwrap();
        assert_eq!(remote_file_name(&url), "input.mp4");
    }
}
