//! Public surface: start, stop, submit and await.

use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::{DispatcherConfig, Retention};
use crate::error::{Error, Result};
use crate::sink::LogSink;
use crate::task_queue::TaskQueue;
use crate::types::{DispatcherState, TaskBody, TaskFailure, TaskId, TaskMeta};
use crate::worker::Worker;

struct Lifecycle {
    state: DispatcherState,
    worker: Option<thread::JoinHandle<usize>>,
}

/// Accepts tasks from any number of producer threads and runs them on one worker.
pub struct Dispatcher<T> {
    queue: Arc<TaskQueue<T>>,
    lifecycle: Mutex<Lifecycle>,
    config: DispatcherConfig,
    sink: Option<Arc<dyn LogSink<T>>>,
}

/// Collects configuration and an optional log sink for a dispatcher.
pub struct DispatcherBuilder<T> {
    config: DispatcherConfig,
    sink: Option<Arc<dyn LogSink<T>>>,
}

impl<T> DispatcherBuilder<T> {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_name = name.into();
        self
    }

    pub fn retention(mut self, retention: Retention) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink<T>>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Dispatcher<T>> {
        self.config.validate()?;
        Ok(Dispatcher {
            queue: Arc::new(TaskQueue::new()),
            lifecycle: Mutex::new(Lifecycle {
                state: DispatcherState::Created,
                worker: None,
            }),
            config: self.config,
            sink: self.sink,
        })
    }
}

impl<T> Dispatcher<T> {
    pub fn builder() -> DispatcherBuilder<T> {
        DispatcherBuilder {
            config: DispatcherConfig::default(),
            sink: None,
        }
    }

    /// Dispatcher with default configuration and no log sink.
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default()).expect("default config is valid")
    }

    pub fn with_config(config: DispatcherConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn state(&self) -> DispatcherState {
        self.lifecycle
            .lock()
            .expect("dispatcher lifecycle mutex poisoned")
            .state
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Tasks queued but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Registry entries currently held.
    pub fn registered(&self) -> usize {
        self.queue.registered()
    }

    /// Stop accepting tasks, wait for the worker to drain the queue, and join it.
    pub fn stop(&self) -> Result<()> {
        let worker = {
            let mut guard = self
                .lifecycle
                .lock()
                .expect("dispatcher lifecycle mutex poisoned");
            if guard.state != DispatcherState::Running {
                return Err(Error::NotRunning);
            }
            guard.state = DispatcherState::Stopping;
            // Closed under the lifecycle lock: no submit succeeds once Stopping is visible.
            self.queue.close();
            guard.worker.take()
        };
        tracing::info!(pending = self.queue.len(), "dispatcher stopping");

        // Join without the lifecycle lock so state() stays readable during the drain.
        let joined = match worker {
            Some(handle) => handle.join().map_err(|_| Error::WorkerPanicked),
            None => Ok(0),
        };

        let mut guard = self
            .lifecycle
            .lock()
            .expect("dispatcher lifecycle mutex poisoned");
        guard.state = DispatcherState::Stopped;
        let executed = joined?;
        tracing::info!(executed, "dispatcher stopped");
        Ok(())
    }
}

impl<T: Send + 'static> Dispatcher<T> {
    /// Spawn the worker thread; valid only once, from `Created`.
    pub fn start(&self) -> Result<()> {
        let mut guard = self
            .lifecycle
            .lock()
            .expect("dispatcher lifecycle mutex poisoned");
        if guard.state != DispatcherState::Created {
            return Err(Error::AlreadyStarted);
        }

        self.queue.open();
        let worker = Worker::new(Arc::clone(&self.queue), self.sink.clone());
        let spawned = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || worker.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.queue.close();
                return Err(Error::Spawn(err));
            }
        };

        guard.worker = Some(handle);
        guard.state = DispatcherState::Running;
        tracing::info!(worker = %self.config.worker_name, "dispatcher started");
        Ok(())
    }

    /// Queue an infallible computation; panics inside it are captured as failures.
    pub fn submit<F>(&self, f: F) -> Result<TaskId>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_boxed(Box::new(move || Ok(f())), None)
    }

    /// Queue a computation and describe it for the log sink.
    pub fn submit_with_meta<F>(&self, f: F, meta: TaskMeta) -> Result<TaskId>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_boxed(Box::new(move || Ok(f())), Some(meta))
    }

    /// Queue a computation whose error is stored as the task's failure.
    pub fn submit_fallible<F, E>(&self, f: F) -> Result<TaskId>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Display + 'static,
    {
        self.submit_boxed(fallible_body(f), None)
    }

    pub fn submit_fallible_with_meta<F, E>(&self, f: F, meta: TaskMeta) -> Result<TaskId>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Display + 'static,
    {
        self.submit_boxed(fallible_body(f), Some(meta))
    }

    pub fn submit_boxed(&self, body: TaskBody<T>, meta: Option<TaskMeta>) -> Result<TaskId> {
        let (id, _) = self.queue.submit(body, meta)?;
        tracing::debug!(id, "task submitted");
        Ok(id)
    }
}

impl<T: Clone> Dispatcher<T> {
    /// Block until task `id` settles and return its value or captured failure.
    pub fn await_result(&self, id: TaskId) -> Result<T> {
        let handle = self.queue.lookup(id).ok_or(Error::UnknownTaskId(id))?;
        let outcome = handle.wait();
        if self.config.retention == Retention::EvictOnAwait {
            self.queue.evict(id);
        }
        outcome.map_err(|failure| Error::TaskExecutionFailure { id, failure })
    }
}

fn fallible_body<T, F, E>(f: F) -> TaskBody<T>
where
    T: 'static,
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    E: Display + 'static,
{
    Box::new(move || f().map_err(|err| TaskFailure::Failed(err.to_string())))
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        if self.state() == DispatcherState::Running {
            if let Err(err) = self.stop() {
                tracing::warn!(error = %err, "dispatcher stop on drop failed");
            }
        }
    }
}
