//! Error taxonomy for the dispatcher and its collaborators.

use crate::types::{TaskFailure, TaskId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("dispatcher is not running")]
    NotRunning,

    #[error("dispatcher already started")]
    AlreadyStarted,

    #[error("unknown task id: {0}")]
    UnknownTaskId(TaskId),

    #[error("task {id} failed: {failure}")]
    TaskExecutionFailure { id: TaskId, failure: TaskFailure },

    #[error("task {0} resolved more than once")]
    AlreadyResolved(TaskId),

    #[error("task id {0} registered more than once")]
    DuplicateTaskId(TaskId),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// The captured task failure, if this error carries one.
    pub fn task_failure(&self) -> Option<&TaskFailure> {
        match self {
            Error::TaskExecutionFailure { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
