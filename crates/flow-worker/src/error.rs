//! Error types for worker dispatch

use thiserror::Error;

use flow_engine::FlowError;

/// Result type alias using WorkerError
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors that can occur on either half of the dispatch channel
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The channel itself is unavailable (connect failure, missing
    /// endpoint); the client falls back from stream to poll on this
    #[error("transport error: {0}")]
    Transport(String),

    /// The worker reported a terminal failure for the task
    #[error("task failed: {0}")]
    Task(String),

    /// A returned binary result could not be opened
    #[error("result integrity check failed: {0}")]
    Integrity(String),

    /// The task was cancelled
    #[error("task cancelled")]
    Cancelled,

    /// A task with this id is already in flight
    #[error("duplicate task id {0}")]
    DuplicateTask(String),

    /// No task with this id is registered
    #[error("unknown task id {0}")]
    UnknownTask(String),

    /// The evaluator process could not be started
    #[error("failed to spawn evaluator process: {0}")]
    Spawn(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }
}

impl From<WorkerError> for FlowError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Transport(msg) => FlowError::Transport(msg),
            WorkerError::Integrity(msg) => FlowError::Integrity(msg),
            WorkerError::Cancelled => FlowError::Cancelled,
            other => FlowError::Computation(other.to_string()),
        }
    }
}
