//! Map from task id to its deferred result.
//!
//! The registry carries no lock of its own; it lives inside the task queue
//! state so that registration and enqueue share one critical section.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::deferred::DeferredResult;
use crate::error::{Error, Result};
use crate::types::{TaskFailure, TaskId};

/// Shared handle to a task's deferred result.
pub type ResultHandle<T> = Arc<DeferredResult<T>>;

pub struct ResultRegistry<T> {
    entries: HashMap<TaskId, ResultHandle<T>>,
}

impl<T> ResultRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a pending entry for `id`.
    pub fn register(&mut self, id: TaskId) -> Result<ResultHandle<T>> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(Error::DuplicateTaskId(id)),
            Entry::Vacant(slot) => {
                let handle = Arc::new(DeferredResult::new(id));
                slot.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    pub fn lookup(&self, id: TaskId) -> Option<ResultHandle<T>> {
        self.entries.get(&id).cloned()
    }

    pub fn resolve(&self, id: TaskId, value: T) -> Result<()> {
        self.entries
            .get(&id)
            .ok_or(Error::UnknownTaskId(id))?
            .resolve(value)
    }

    pub fn fail(&self, id: TaskId, failure: TaskFailure) -> Result<()> {
        self.entries
            .get(&id)
            .ok_or(Error::UnknownTaskId(id))?
            .fail(failure)
    }

    /// Drop the entry; outstanding handles stay valid.
    pub fn evict(&mut self, id: TaskId) -> Option<ResultHandle<T>> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for ResultRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
