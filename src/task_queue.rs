//! Thread-safe FIFO task queue paired with the result registry.
//!
//! Queue, registry and the id counter share one mutex so that no producer
//! can observe an id without its deferred result.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::registry::{ResultHandle, ResultRegistry};
use crate::types::{Task, TaskBody, TaskFailure, TaskId, TaskMeta};

/// Synchronized FIFO feeding the single worker.
pub struct TaskQueue<T> {
    inner: Mutex<TaskQueueState<T>>,
    available: Condvar,
}

struct TaskQueueState<T> {
    queue: VecDeque<Task<T>>,
    registry: ResultRegistry<T>,
    next_id: TaskId,
    accepting: bool,
}

impl<T> TaskQueue<T> {
    /// Create an empty queue that rejects submissions until opened.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TaskQueueState {
                queue: VecDeque::new(),
                registry: ResultRegistry::new(),
                next_id: 0,
                accepting: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Start accepting submissions.
    pub fn open(&self) {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.accepting = true;
    }

    /// Allocate an id, register its deferred result and enqueue the task.
    pub fn submit(&self, body: TaskBody<T>, meta: Option<TaskMeta>) -> Result<(TaskId, ResultHandle<T>)> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        if !guard.accepting {
            return Err(Error::NotRunning);
        }
        let id = guard.next_id;
        let handle = guard.registry.register(id)?;
        guard.next_id += 1;
        guard.queue.push_back(Task::new(id, body, meta));
        self.available.notify_one();
        Ok((id, handle))
    }

    /// Try to pop immediately without blocking.
    pub fn try_pop(&self) -> Option<Task<T>> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.queue.pop_front()
    }

    /// Block until a task is available or the queue is closed and drained.
    pub fn pop_blocking_or_closed(&self) -> Option<Task<T>> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        loop {
            if let Some(task) = guard.queue.pop_front() {
                return Some(task);
            }
            if !guard.accepting {
                return None;
            }
            // Wait releases the lock and re-acquires it before returning.
            guard = self.available.wait(guard).expect("condvar wait failed");
        }
    }

    /// Stop accepting submissions and wake all blocked consumers.
    pub fn close(&self) {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.accepting = false;
        self.available.notify_all();
    }

    /// Record the outcome of task `id` in its registry entry.
    pub fn settle(&self, id: TaskId, outcome: std::result::Result<T, TaskFailure>) -> Result<()> {
        let guard = self.inner.lock().expect("task queue mutex poisoned");
        match outcome {
            Ok(value) => guard.registry.resolve(id, value),
            Err(failure) => guard.registry.fail(id, failure),
        }
    }

    pub fn lookup(&self, id: TaskId) -> Option<ResultHandle<T>> {
        let guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.registry.lookup(id)
    }

    pub fn evict(&self, id: TaskId) -> Option<ResultHandle<T>> {
        let mut guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.registry.evict(id)
    }

    /// Current number of queued tasks.
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registry entries still held.
    pub fn registered(&self) -> usize {
        let guard = self.inner.lock().expect("task queue mutex poisoned");
        guard.registry.len()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
