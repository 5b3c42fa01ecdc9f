//! Error types for scheduler operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::registry::TaskKey;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Domain failure declared by a task handler.
///
/// Handlers raise this for input the model cannot serve; the message and the
/// suggested client status are surfaced to the caller as-is. Any other
/// handler failure is wrapped as [`SchedulerError::Unknown`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelError {
    /// Human-readable failure description.
    pub message: String,
    /// Suggested HTTP status for the front-end to return.
    pub http_status: u16,
}

impl ModelError {
    /// Create a domain error with the conventional 400 status.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            http_status: 400,
        }
    }

    /// Create a domain error with an explicit client status.
    pub fn with_status(message: impl Into<String>, http_status: u16) -> Self {
        Self {
            message: message.into(),
            http_status,
        }
    }
}

impl Default for ModelError {
    fn default() -> Self {
        Self::new("error in model inference")
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ModelError {}

/// The failure kinds a batch execution can report across the worker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskErrorKind {
    /// Handler-declared domain failure.
    Model,
    /// Uncaught handler failure.
    Unknown,
    /// The worker process exited before returning a result.
    WorkerCrash,
}

/// Serializable batch failure, produced by the worker pool and fanned out to
/// every completion handle of the failed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Failure kind.
    pub kind: TaskErrorKind,
    /// Diagnostic message.
    pub message: String,
    /// Suggested HTTP status for the front-end.
    pub http_status: u16,
}

impl TaskError {
    /// Wrap a handler-declared domain failure.
    pub fn model(err: ModelError) -> Self {
        Self {
            kind: TaskErrorKind::Model,
            message: err.message,
            http_status: err.http_status,
        }
    }

    /// Wrap an uncaught handler failure, HTTP 400 by convention.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Unknown,
            message: message.into(),
            http_status: 400,
        }
    }

    /// A worker died without returning; the batch fails with this kind.
    pub fn worker_crash() -> Self {
        Self {
            kind: TaskErrorKind::WorkerCrash,
            message: "worker process exited before returning a result".into(),
            http_status: 500,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TaskError {}

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Submission to a task name with no registered handler.
    #[error("unknown task `{0}`")]
    UnknownTask(String),
    /// Two handlers registered for the same task key; detected at startup.
    #[error("duplicate task `{0}`")]
    DuplicateTask(TaskKey),
    /// Handler-declared domain failure.
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    /// Uncaught handler failure, wrapped with a diagnostic.
    #[error("unhandled model failure: {0}")]
    Unknown(String),
    /// A worker process died mid-batch; the pool replaces it.
    #[error("worker process crashed")]
    WorkerCrash,
    /// The submission was abandoned before its batch was dispatched.
    #[error("submission cancelled")]
    Cancelled,
    /// Operation requires a started scheduler.
    #[error("scheduler is not running")]
    NotRunning,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Instrument registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl SchedulerError {
    /// Suggested HTTP status for the front-end to translate this error to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UnknownTask(_) => 404,
            Self::Model(err) => err.http_status,
            Self::Unknown(_) => 400,
            Self::NotRunning => 503,
            Self::DuplicateTask(_)
            | Self::WorkerCrash
            | Self::Cancelled
            | Self::InvalidConfig(_)
            | Self::Metrics(_) => 500,
        }
    }
}

impl From<TaskError> for SchedulerError {
    fn from(err: TaskError) -> Self {
        match err.kind {
            TaskErrorKind::Model => Self::Model(ModelError {
                message: err.message,
                http_status: err.http_status,
            }),
            TaskErrorKind::Unknown => Self::Unknown(err.message),
            TaskErrorKind::WorkerCrash => Self::WorkerCrash,
        }
    }
}
