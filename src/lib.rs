//! Single-worker task server: producers submit work from any thread and
//! block on per-task deferred results.

pub mod config;
pub mod deferred;
pub mod dispatcher;
pub mod error;
pub mod harness;
pub mod logging;
pub mod registry;
pub mod sink;
pub mod task_queue;
pub mod types;
pub mod worker;

pub use config::{DispatcherConfig, Retention};
pub use deferred::DeferredResult;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{Error, Result};
pub use sink::{FileSink, LogSink, WriterSink};
pub use types::{DispatcherState, TaskFailure, TaskId, TaskMeta};
