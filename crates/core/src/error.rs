//! Task model error type.

use thiserror::Error;

/// Result type used across the task model.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors raised while building or decoding tasks.
///
/// Store and transport failures live in `switchyard-store`; this enum only
/// covers deterministic failures of the model itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A payload could not be encoded or decoded.
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl TaskError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn payload(msg: impl Into<String>) -> Self {
        Self::Payload(msg.into())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}
