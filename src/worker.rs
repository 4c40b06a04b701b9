//! The single execution loop that drains the task queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::sink::LogSink;
use crate::task_queue::TaskQueue;
use crate::types::{Task, TaskFailure};

/// Pulls tasks in FIFO order and settles their deferred results.
pub struct Worker<T> {
    queue: Arc<TaskQueue<T>>,
    sink: Option<Arc<dyn LogSink<T>>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn new(queue: Arc<TaskQueue<T>>, sink: Option<Arc<dyn LogSink<T>>>) -> Self {
        Self { queue, sink }
    }

    /// Run until the queue is closed and drained; returns the number of tasks executed.
    pub fn run(self) -> usize {
        let mut executed = 0usize;
        while let Some(task) = self.queue.pop_blocking_or_closed() {
            tracing::debug!(id = task.id, "dequeued task");
            self.execute(task);
            executed += 1;
        }
        tracing::debug!(executed, "worker drained queue");
        executed
    }

    fn execute(&self, task: Task<T>) {
        let Task { id, body, meta } = task;
        // No queue lock is held here; producers keep submitting while the body runs.
        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(result) => result,
            Err(payload) => Err(TaskFailure::Panicked(panic_message(payload.as_ref()))),
        };
        if let Err(failure) = &outcome {
            tracing::warn!(id, %failure, "task failed");
        }

        if let (Some(sink), Some(meta)) = (self.sink.as_ref(), meta.as_ref()) {
            // The sink runs caller code too; a panic there must not skip settle below.
            let recorded =
                panic::catch_unwind(AssertUnwindSafe(|| sink.record(id, meta, outcome.as_ref())));
            match recorded {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(id, error = %err, "log sink write failed"),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(id, %message, "log sink panicked");
                }
            }
        }

        // Entries are only evicted after they settle, so this cannot miss.
        if let Err(err) = self.queue.settle(id, outcome) {
            tracing::error!(id, error = %err, "failed to settle task result");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
