use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use task_server::harness;
use task_server::logging;

#[derive(Parser, Debug)]
#[command(name = "task_server", version, about = "Single-worker task server: demo, benchmarks and output checks")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug); RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Three producers submit sin/sqrt/pow tasks; results go to per-operation files.
    Demo {
        /// Tasks submitted by each producer.
        #[arg(long, default_value_t = 10_000)]
        tasks: usize,
        /// Directory for `<operation>_output.txt` files.
        #[arg(long, default_value = "task_output")]
        out: PathBuf,
    },
    /// Run one benchmark and print a CSV row.
    Bench {
        #[arg(default_value_t = 4)]
        producers: usize,
        #[arg(default_value_t = 2_500)]
        tasks_per_producer: usize,
        /// Sine terms summed per task.
        #[arg(long, default_value_t = 200)]
        work: u64,
    },
    /// Sweep producer counts and task counts (comma-separated lists).
    Stress {
        #[arg(long, value_delimiter = ',', default_values_t = [1usize, 2, 4, 8])]
        producers: Vec<usize>,
        #[arg(long, value_delimiter = ',', default_values_t = [1_000usize, 5_000])]
        tasks: Vec<usize>,
        #[arg(long, default_value_t = 200)]
        work: u64,
    },
    /// Recompute the values recorded by `demo` and report mismatches.
    Check {
        #[arg(default_value = "task_output")]
        dir: PathBuf,
    },
}

fn run(command: Command) -> task_server::Result<bool> {
    match command {
        Command::Demo { tasks, out } => {
            let summary = harness::run_demo(tasks, &out)?;
            println!("DEMO SUMMARY");
            println!("producers={} tasks_total={}", summary.producers, summary.tasks_total);
            println!("unique_ids={}", summary.unique_ids);
            println!("resolved={} failed={}", summary.resolved, summary.failed);
            println!("output_dir={}", out.display());
            Ok(summary.unique_ids && summary.failed == 0)
        }
        Command::Bench {
            producers,
            tasks_per_producer,
            work,
        } => {
            harness::run_benchmark(producers, tasks_per_producer, work)?;
            Ok(true)
        }
        Command::Stress {
            producers,
            tasks,
            work,
        } => {
            harness::run_stress(&producers, &tasks, work)?;
            Ok(true)
        }
        Command::Check { dir } => {
            let mut clean = true;
            for check in harness::check_outputs(&dir)? {
                if check.mismatches == 0 && check.unparsable == 0 {
                    println!("{}: all {} values are correct", check.operation, check.lines);
                } else {
                    clean = false;
                    println!(
                        "{}: mismatches={} unparsable={} of {}",
                        check.operation, check.mismatches, check.unparsable, check.lines
                    );
                }
            }
            Ok(clean)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    logging::init(level);

    let command = cli.command.unwrap_or(Command::Demo {
        tasks: 10_000,
        out: PathBuf::from("task_output"),
    });
    match run(command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
