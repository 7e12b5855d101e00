//! Analysis worker for ParkLens.
//!
//! This crate provides:
//! - The task executor and its lifecycle bookkeeping
//! - The analysis runner abstraction (subprocess and in-process Gemini)
//! - Publication of runner output as task artifacts
//! - Structured task logging

pub mod config;
pub mod error;
pub mod executor;
pub mod gemini;
pub mod logging;
pub mod materializer;
pub mod pipeline;
pub mod runner;

pub use config::{RunnerMode, TaskStoreKind, WorkerConfig};
pub use error::{RunnerError, WorkerError, WorkerResult};
pub use executor::{ExecutorSettings, TaskExecutor};
pub use gemini::GeminiClient;
pub use logging::TaskLogger;
pub use materializer::ResultMaterializer;
pub use pipeline::{AnalysisOutcome, GeminiRunner};
pub use runner::{AnalysisRunner, RunOutput, RunRequest, SubprocessRunner};
