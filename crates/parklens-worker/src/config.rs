//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use parklens_models::DEFAULT_END_OFFSET_DEG;
use tracing::warn;

/// Default inference model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";

/// Default public endpoint of the Gemini REST API.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// How the analysis runner is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    /// Spawn `RUNNER_COMMAND` as a child process per task
    Subprocess,
    /// Run the Gemini pipeline inside the server process
    Inline,
}

impl FromStr for RunnerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subprocess" | "process" => Ok(Self::Subprocess),
            "inline" | "in_process" => Ok(Self::Inline),
            other => Err(format!("unknown runner mode '{}'", other)),
        }
    }
}

/// Which task registry backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStoreKind {
    Memory,
    Redis,
}

impl FromStr for TaskStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown task store '{}'", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the per-task working directories (`{work_dir}/{task_id}/`)
    pub work_dir: PathBuf,
    /// Where uploaded videos are saved
    pub uploads_dir: PathBuf,
    /// Local preset videos (`{presets_dir}/{preset_id}.mp4`)
    pub presets_dir: PathBuf,
    /// Remote preset bucket; when set, presets are fetched from
    /// `{preset_base_url}/{preset_id}.mp4`
    pub preset_base_url: Option<String>,
    pub runner_mode: RunnerMode,
    /// Command line of the external runner (program plus leading args)
    pub runner_command: String,
    pub gemini_model: String,
    /// Gemini API key (inline runner only)
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub prompt_file: PathBuf,
    /// Upper bound on one runner invocation; unbounded when `None`
    pub runner_timeout: Option<Duration>,
    /// Offset applied to the start coordinate to derive the end coordinate
    pub end_gps_offset_deg: f64,
    /// Terminal records older than this are evicted; never when `None`
    pub task_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    pub task_store: TaskStoreKind,
    pub redis_url: String,
    /// How long shutdown waits for cancelled runs to settle
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("work"),
            uploads_dir: PathBuf::from("uploads"),
            presets_dir: PathBuf::from("presets"),
            preset_base_url: None,
            runner_mode: RunnerMode::Subprocess,
            runner_command: "parklens-analyze".to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            prompt_file: PathBuf::from("gemini_prompt.md"),
            runner_timeout: None,
            end_gps_offset_deg: DEFAULT_END_OFFSET_DEG,
            task_ttl: None,
            sweep_interval: Duration::from_secs(60),
            task_store: TaskStoreKind::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            work_dir: env_path("WORK_DIR").unwrap_or(defaults.work_dir),
            uploads_dir: env_path("UPLOADS_DIR").unwrap_or(defaults.uploads_dir),
            presets_dir: env_path("PRESETS_DIR").unwrap_or(defaults.presets_dir),
            preset_base_url: env_string("PRESET_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            runner_mode: env_parse("RUNNER_MODE").unwrap_or(defaults.runner_mode),
            runner_command: env_string("RUNNER_COMMAND").unwrap_or(defaults.runner_command),
            gemini_model: env_string("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_api_key: env_string("GEMINI_API_KEY"),
            gemini_base_url: env_string("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            prompt_file: env_path("PROMPT_FILE").unwrap_or(defaults.prompt_file),
            runner_timeout: env_parse::<u64>("RUNNER_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            end_gps_offset_deg: env_parse::<f64>("END_GPS_OFFSET_DEG")
                .filter(|d| d.is_finite())
                .unwrap_or(defaults.end_gps_offset_deg),
            task_ttl: env_parse::<u64>("TASK_TTL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            sweep_interval: env_parse::<u64>("TASK_SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            task_store: env_parse("TASK_STORE").unwrap_or(defaults.task_store),
            redis_url: env_string("REDIS_URL").unwrap_or(defaults.redis_url),
            shutdown_timeout: env_parse::<u64>("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_string(name).map(PathBuf::from)
}

fn env_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring invalid {}='{}': {}", name, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.runner_mode, RunnerMode::Subprocess);
        assert_eq!(config.gemini_model, "gemini-3-flash-preview");
        assert!(config.runner_timeout.is_none());
        assert!(config.task_ttl.is_none());
        assert!((config.end_gps_offset_deg - 0.005).abs() < f64::EPSILON);
        assert_eq!(config.task_store, TaskStoreKind::Memory);
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("inline".parse::<RunnerMode>().unwrap(), RunnerMode::Inline);
        assert_eq!("Subprocess".parse::<RunnerMode>().unwrap(), RunnerMode::Subprocess);
        assert!("thread".parse::<RunnerMode>().is_err());
        assert_eq!("redis".parse::<TaskStoreKind>().unwrap(), TaskStoreKind::Redis);
        assert!("sqlite".parse::<TaskStoreKind>().is_err());
    }
}
