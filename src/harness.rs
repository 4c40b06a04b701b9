//! Producer harness: demo run, benchmarks, thread-count sweeps and an
//! output checker for the result files written by [`FileSink`].

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use rand::Rng;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::sink::FileSink;
use crate::types::{TaskId, TaskMeta};

/// Operations issued by the demo producers, one producer each.
pub const DEMO_OPERATIONS: [&str; 3] = ["sin", "sqrt", "pow"];

const CSV_HEADER: &str = "producers,tasks_per_producer,total_tasks,elapsed_ms,throughput_tasks_per_s,avg_submit_us,cpu_user_s,cpu_sys_s,failed,duplicate_ids";

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data and getrusage only writes into it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((seconds(usage.ru_utime), seconds(usage.ru_stime)))
}

#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Evaluate a demo operation on its arguments.
pub fn evaluate(operation: &str, args: &[f64]) -> Option<f64> {
    match (operation, args) {
        ("sin", [x]) => Some(x.sin()),
        ("sqrt", [x]) => Some(x.sqrt()),
        ("pow", [base, exp]) => Some(base.powf(*exp)),
        _ => None,
    }
}

fn random_args(operation: &str, rng: &mut impl Rng) -> Vec<f64> {
    let arity = if operation == "pow" { 2 } else { 1 };
    (0..arity).map(|_| rng.gen_range(0.1..10.0)).collect()
}

/// Outcome of a demo run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSummary {
    pub producers: usize,
    pub tasks_total: usize,
    pub unique_ids: bool,
    pub resolved: usize,
    pub failed: usize,
}

/// Three producers (sin, sqrt, pow) submit concurrently; results land in `out_dir`.
pub fn run_demo(tasks_per_producer: usize, out_dir: &Path) -> Result<DemoSummary> {
    if tasks_per_producer == 0 {
        return Err(Error::config("tasks_per_producer must be > 0"));
    }
    let sink = Arc::new(FileSink::create(out_dir)?);
    for operation in DEMO_OPERATIONS {
        // Each run starts from empty result files.
        let path = sink.path_for(operation);
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }

    let dispatcher = Arc::new(
        Dispatcher::<f64>::builder()
            .worker_name("demo-worker")
            .sink(sink)
            .build()?,
    );
    dispatcher.start()?;
    tracing::info!(tasks_per_producer, "demo producers starting");

    let mut handles = Vec::new();
    for operation in DEMO_OPERATIONS {
        let dispatcher = Arc::clone(&dispatcher);
        let handle = thread::Builder::new()
            .name(format!("producer-{operation}"))
            .spawn(move || -> Result<Vec<TaskId>> {
                let mut rng = rand::thread_rng();
                let mut ids = Vec::with_capacity(tasks_per_producer);
                for _ in 0..tasks_per_producer {
                    let args = random_args(operation, &mut rng);
                    let meta = TaskMeta::new(operation, args.iter());
                    let id = dispatcher.submit_fallible_with_meta(
                        move || {
                            evaluate(operation, &args)
                                .ok_or_else(|| format!("unsupported operation {operation}"))
                        },
                        meta,
                    )?;
                    ids.push(id);
                }
                Ok(ids)
            })
            .map_err(Error::Spawn)?;
        handles.push(handle);
    }

    let mut ids = Vec::new();
    for handle in handles {
        let produced = handle.join().map_err(|_| Error::WorkerPanicked)??;
        ids.extend(produced);
    }
    dispatcher.stop()?;

    let unique: HashSet<TaskId> = ids.iter().copied().collect();
    let mut resolved = 0usize;
    let mut failed = 0usize;
    for &id in &ids {
        match dispatcher.await_result(id) {
            Ok(_) => resolved += 1,
            Err(Error::TaskExecutionFailure { .. }) => failed += 1,
            Err(err) => return Err(err),
        }
    }

    Ok(DemoSummary {
        producers: DEMO_OPERATIONS.len(),
        tasks_total: ids.len(),
        unique_ids: unique.len() == ids.len(),
        resolved,
        failed,
    })
}

/// Aggregated metrics from a single benchmark run.
#[derive(Debug, Clone)]
pub struct BenchResult {
    pub producers: usize,
    pub tasks_per_producer: usize,
    pub total_tasks: usize,
    pub elapsed_ms: f64,
    pub throughput: f64,
    pub avg_submit_us: f64,
    pub cpu_user_s: Option<f64>,
    pub cpu_sys_s: Option<f64>,
    pub failed: usize,
    pub duplicate_ids: bool,
}

impl BenchResult {
    pub fn csv_row(&self) -> String {
        let cpu = |v: Option<f64>| v.map(|v| format!("{v:.4}")).unwrap_or_else(|| "NA".to_string());
        format!(
            "{},{},{},{:.2},{:.2},{:.3},{},{},{},{}",
            self.producers,
            self.tasks_per_producer,
            self.total_tasks,
            self.elapsed_ms,
            self.throughput,
            self.avg_submit_us,
            cpu(self.cpu_user_s),
            cpu(self.cpu_sys_s),
            self.failed,
            self.duplicate_ids
        )
    }
}

/// Sine partial sum used as the benchmark workload.
fn sine_sum(terms: u64) -> f64 {
    (0..terms).map(|i| (i as f64 * 0.001).sin()).sum()
}

/// Producers submit `tasks_per_producer` sine sums of `work` terms, then await them.
pub fn benchmark_once(producers: usize, tasks_per_producer: usize, work: u64) -> Result<BenchResult> {
    if producers == 0 {
        return Err(Error::config("producers must be > 0"));
    }
    if tasks_per_producer == 0 {
        return Err(Error::config("tasks_per_producer must be > 0"));
    }

    let dispatcher = Arc::new(Dispatcher::<f64>::builder().worker_name("bench-worker").build()?);
    dispatcher.start()?;

    let cpu_start = cpu_times_seconds();
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..producers {
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(thread::spawn(move || -> Result<(Vec<TaskId>, u128, usize)> {
            let mut ids = Vec::with_capacity(tasks_per_producer);
            let mut submit_ns = 0u128;
            for _ in 0..tasks_per_producer {
                let submitted = Instant::now();
                ids.push(dispatcher.submit(move || sine_sum(work))?);
                submit_ns += submitted.elapsed().as_nanos();
            }
            let mut failed = 0usize;
            for &id in &ids {
                if dispatcher.await_result(id).is_err() {
                    failed += 1;
                }
            }
            Ok((ids, submit_ns, failed))
        }));
    }

    let mut all_ids = Vec::with_capacity(producers * tasks_per_producer);
    let mut submit_ns = 0u128;
    let mut failed = 0usize;
    for handle in handles {
        let (ids, ns, fails) = handle.join().map_err(|_| Error::WorkerPanicked)??;
        all_ids.extend(ids);
        submit_ns += ns;
        failed += fails;
    }
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    dispatcher.stop()?;

    let total_tasks = all_ids.len();
    let unique: HashSet<TaskId> = all_ids.iter().copied().collect();
    let throughput = if elapsed_ms > 0.0 {
        total_tasks as f64 / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };

    Ok(BenchResult {
        producers,
        tasks_per_producer,
        total_tasks,
        elapsed_ms,
        throughput,
        avg_submit_us: submit_ns as f64 / 1000.0 / total_tasks as f64,
        cpu_user_s,
        cpu_sys_s,
        failed,
        duplicate_ids: unique.len() != total_tasks,
    })
}

/// Run a single benchmark and print one CSV row.
pub fn run_benchmark(producers: usize, tasks_per_producer: usize, work: u64) -> Result<()> {
    let result = benchmark_once(producers, tasks_per_producer, work)?;
    println!("{CSV_HEADER}");
    println!("{}", result.csv_row());
    if result.duplicate_ids {
        eprintln!("# violation,duplicate_ids");
    }
    Ok(())
}

/// Sweep producer counts and task counts, printing CSV output.
pub fn run_stress(producer_sets: &[usize], task_sets: &[usize], work: u64) -> Result<()> {
    if producer_sets.is_empty() || task_sets.is_empty() {
        return Err(Error::config("stress sets must not be empty"));
    }
    println!("{CSV_HEADER}");
    for &producers in producer_sets {
        for &tasks_per_producer in task_sets {
            let result = benchmark_once(producers, tasks_per_producer, work)?;
            println!("{}", result.csv_row());
            if result.duplicate_ids {
                eprintln!("# violation,duplicate_ids");
            }
        }
    }
    Ok(())
}

/// Mismatch tally for one result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    pub operation: String,
    pub lines: usize,
    pub mismatches: usize,
    pub unparsable: usize,
}

fn approx_equal(a: f64, b: f64) -> bool {
    if (a - b).abs() < 1e-6 {
        return true;
    }
    (a - b).abs() / a.abs().max(b.abs()) < 1e-4
}

/// Parse `op arg... = value` and compare with a fresh evaluation.
fn line_matches(operation: &str, line: &str) -> Option<bool> {
    let (lhs, rhs) = line.split_once(" = ")?;
    let mut parts = lhs.split_whitespace();
    if parts.next()? != operation {
        return None;
    }
    let args = parts
        .map(|part| part.parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let recorded = rhs.trim().parse::<f64>().ok()?;
    let computed = evaluate(operation, &args)?;
    Some(approx_equal(recorded, computed))
}

/// Recompute every recorded line of the demo result files in `dir`.
pub fn check_outputs(dir: &Path) -> Result<Vec<FileCheck>> {
    let mut checks = Vec::new();
    for operation in DEMO_OPERATIONS {
        let path = dir.join(format!("{operation}_output.txt"));
        let text = fs::read_to_string(&path)?;
        let mut check = FileCheck {
            operation: operation.to_string(),
            lines: 0,
            mismatches: 0,
            unparsable: 0,
        };
        for (index, line) in text.lines().enumerate() {
            check.lines += 1;
            match line_matches(operation, line) {
                Some(true) => {}
                Some(false) => {
                    tracing::warn!(file = %path.display(), line = index + 1, "value mismatch");
                    check.mismatches += 1;
                }
                None => check.unparsable += 1,
            }
        }
        checks.push(check);
    }
    Ok(checks)
}
