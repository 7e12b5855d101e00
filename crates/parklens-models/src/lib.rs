//! Shared data models for the ParkLens backend.
//!
//! This crate provides Serde-serializable types for:
//! - Analysis tasks and their lifecycle states
//! - GPS coordinates and synthesized telemetry logs
//! - Analysis results and their key normalization
//! - Timestamp parsing for detection records
//! - The status snapshot rendered to clients

pub mod analysis;
pub mod error;
pub mod gps;
pub mod task;
pub mod timestamp;
pub mod view;

// Re-export common types
pub use analysis::{normalize_result, AnalysisResult, PathPoint, Spot};
pub use error::{ModelError, ModelResult};
pub use gps::{generate_telemetry, GpsPoint, DEFAULT_END_OFFSET_DEG};
pub use task::{
    Artifact, ArtifactKind, FailureCause, InputRef, Task, TaskFailure, TaskId, TaskResult,
    TaskState,
};
pub use timestamp::{parse_timestamp, TimestampError};
pub use view::TaskView;
