//! Shared identifiers and task model used across the system.

use std::fmt;

/// Unique identifier issued by a dispatcher at submission time.
pub type TaskId = u64;

/// Nullary task body as stored in the queue.
pub type TaskBody<T> = Box<dyn FnOnce() -> Result<T, TaskFailure> + Send + 'static>;

/// Human-readable description of a task, used only by log sinks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskMeta {
    /// Operation label, e.g. `sin`.
    pub operation: String,
    /// Inputs already rendered for output.
    pub inputs: Vec<String>,
}

impl TaskMeta {
    /// Construct metadata from an operation label and displayable inputs.
    pub fn new<I, V>(operation: impl Into<String>, inputs: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: fmt::Display,
    {
        Self {
            operation: operation.into(),
            inputs: inputs.into_iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Failure captured on the worker thread and handed back to awaiting producers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    /// The body returned an error.
    #[error("{0}")]
    Failed(String),
    /// The body panicked; the payload message if it was a string.
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Unit of work waiting in the queue.
pub struct Task<T> {
    pub id: TaskId,
    pub body: TaskBody<T>,
    pub meta: Option<TaskMeta>,
}

impl<T> Task<T> {
    pub fn new(id: TaskId, body: TaskBody<T>, meta: Option<TaskMeta>) -> Self {
        Self { id, body, meta }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    Created,
    Running,
    Stopping,
    Stopped,
}
