//! Model error types.

use thiserror::Error;

use crate::timestamp::TimestampError;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while parsing or mutating domain models.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Malformed analysis result: {0}")]
    MalformedResult(String),

    #[error("Invalid input reference: {0}")]
    InvalidInput(String),

    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
}

impl ModelError {
    pub fn invalid_coordinates(msg: impl Into<String>) -> Self {
        Self::InvalidCoordinates(msg.into())
    }

    pub fn malformed_result(msg: impl Into<String>) -> Self {
        Self::MalformedResult(msg.into())
    }
}
