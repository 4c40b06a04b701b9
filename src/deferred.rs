//! Single-assignment result cell with a blocking read.

use std::sync::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::types::{TaskFailure, TaskId};

enum DeferredState<T> {
    Pending,
    Resolved(T),
    Failed(TaskFailure),
}

/// Result of one task; transitions out of `Pending` exactly once.
pub struct DeferredResult<T> {
    id: TaskId,
    state: Mutex<DeferredState<T>>,
    settled: Condvar,
}

impl<T> DeferredResult<T> {
    /// Create a pending cell for `id`.
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            state: Mutex::new(DeferredState::Pending),
            settled: Condvar::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Store the value produced by the task.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.settle(DeferredState::Resolved(value))
    }

    /// Store the failure captured while running the task.
    pub fn fail(&self, failure: TaskFailure) -> Result<()> {
        self.settle(DeferredState::Failed(failure))
    }

    fn settle(&self, next: DeferredState<T>) -> Result<()> {
        let mut guard = self.state.lock().expect("deferred result mutex poisoned");
        if !matches!(*guard, DeferredState::Pending) {
            return Err(Error::AlreadyResolved(self.id));
        }
        *guard = next;
        self.settled.notify_all();
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        let guard = self.state.lock().expect("deferred result mutex poisoned");
        matches!(*guard, DeferredState::Pending)
    }
}

impl<T: Clone> DeferredResult<T> {
    /// Block until settled and return a copy of the outcome.
    pub fn wait(&self) -> std::result::Result<T, TaskFailure> {
        let mut guard = self.state.lock().expect("deferred result mutex poisoned");
        loop {
            match &*guard {
                DeferredState::Pending => {}
                DeferredState::Resolved(value) => return Ok(value.clone()),
                DeferredState::Failed(failure) => return Err(failure.clone()),
            }
            guard = self.settled.wait(guard).expect("condvar wait failed");
        }
    }

    /// Non-blocking peek; `None` while pending.
    pub fn try_get(&self) -> Option<std::result::Result<T, TaskFailure>> {
        let guard = self.state.lock().expect("deferred result mutex poisoned");
        match &*guard {
            DeferredState::Pending => None,
            DeferredState::Resolved(value) => Some(Ok(value.clone())),
            DeferredState::Failed(failure) => Some(Err(failure.clone())),
        }
    }
}
