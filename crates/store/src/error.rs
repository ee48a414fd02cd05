use std::time::Duration;

use switchyard_core::TaskError;

/// Error raised by a coordination store.
///
/// All variants are transient from the caller's point of view: loops log
/// them and try again on their next tick. None of them ever means "empty"
/// or "lock free".
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// In-memory state was poisoned by a panicking thread.
    #[error("store state poisoned")]
    Poisoned,

    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

impl From<TaskError> for StoreError {
    fn from(err: TaskError) -> Self {
        Self::Serialization(err.to_string())
    }
}
