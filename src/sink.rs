//! Append-only record sinks fed by the worker after each task.
//!
//! Every sink serializes writes behind its own lock, which is never the
//! task queue lock.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::{TaskFailure, TaskId, TaskMeta};

/// Receives one record per executed task that carried metadata.
pub trait LogSink<T>: Send + Sync {
    fn record(
        &self,
        id: TaskId,
        meta: &TaskMeta,
        outcome: Result<&T, &TaskFailure>,
    ) -> io::Result<()>;
}

/// Render `op in1 in2 = value` or `op in1 in2 ! failure`.
pub fn format_record<T: Display>(meta: &TaskMeta, outcome: Result<&T, &TaskFailure>) -> String {
    let mut line = meta.operation.clone();
    for input in &meta.inputs {
        line.push(' ');
        line.push_str(input);
    }
    match outcome {
        Ok(value) => line.push_str(&format!(" = {value}")),
        Err(failure) => line.push_str(&format!(" ! {failure}")),
    }
    line
}

/// Writes every record to a single writer.
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer, e.g. to inspect an in-memory buffer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .expect("log sink mutex poisoned")
    }
}

impl<T: Display, W: Write + Send> LogSink<T> for WriterSink<W> {
    fn record(
        &self,
        _id: TaskId,
        meta: &TaskMeta,
        outcome: Result<&T, &TaskFailure>,
    ) -> io::Result<()> {
        let line = format_record(meta, outcome);
        let mut guard = self.writer.lock().expect("log sink mutex poisoned");
        writeln!(guard, "{line}")?;
        guard.flush()
    }
}

/// Appends records to `<dir>/<operation>_output.txt`, one file per label.
pub struct FileSink {
    dir: PathBuf,
    files: Mutex<HashMap<String, File>>,
}

impl FileSink {
    /// Create the output directory if needed.
    pub fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path that records for `operation` are appended to.
    pub fn path_for(&self, operation: &str) -> PathBuf {
        self.dir.join(format!("{operation}_output.txt"))
    }
}

impl<T: Display> LogSink<T> for FileSink {
    fn record(
        &self,
        _id: TaskId,
        meta: &TaskMeta,
        outcome: Result<&T, &TaskFailure>,
    ) -> io::Result<()> {
        let line = format_record(meta, outcome);
        let mut files = self.files.lock().expect("log sink mutex poisoned");
        let file = match files.entry(meta.operation.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.path_for(&meta.operation))?,
            ),
        };
        writeln!(file, "{line}")
    }
}
