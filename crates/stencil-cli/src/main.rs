//! Stencil command-line interface.
//!
//! Apply a box stencil to a batch of matrices:
//! ```sh
//! stencil-cli run input.txt filter.txt output.txt
//! stencil-cli serial input.txt filter.txt output.txt
//! stencil-cli validate input.txt filter.txt
//! stencil-cli report bench.log
//! ```
//!
//! `run` uses `STENCIL_WORKERS` in-process workers, or the MPI world when
//! built with `--features mpi` and launched under `mpirun`.

mod config;
mod report;
mod runner;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::RunConfig;

#[derive(Parser)]
#[command(name = "stencil-cli")]
#[command(about = "Distributed 2-D box stencil over a batch of matrices")]
#[command(version)]
struct Cli {
    /// Optional TOML run configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the filter across all workers and write the result.
    Run {
        /// Input batch file (`b m n` header).
        input: PathBuf,
        /// Filter file (`k` or `k k` header).
        filter: PathBuf,
        /// Output file.
        output: PathBuf,
    },
    /// Apply the filter in this process only.
    Serial {
        input: PathBuf,
        filter: PathBuf,
        output: PathBuf,
    },
    /// Check both input files without computing.
    Validate { input: PathBuf, filter: PathBuf },
    /// Build a strong-scaling table from a benchmark log.
    Report {
        /// Log with `-> Threads = P` markers and timing lines.
        log: PathBuf,
        /// Emit JSON instead of Markdown.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = RunConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            input,
            filter,
            output,
        } => runner::run_distributed(&config, &input, &filter, &output),
        Commands::Serial {
            input,
            filter,
            output,
        } => runner::run_serial_job(&config, &input, &filter, &output),
        Commands::Validate { input, filter } => runner::validate(&config, &input, &filter),
        Commands::Report { log, json } => {
            let text = std::fs::read_to_string(&log)
                .with_context(|| format!("Unable to read log {}", log.display()))?;
            let rows = report::scaling_rows(report::parse_log(&text, &config.timing_label))
                .with_context(|| format!("Cannot build scaling table from {}", log.display()))?;
            if json {
                let json = serde_json::to_string_pretty(&rows)
                    .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
                println!("{}", json);
            } else {
                print!("{}", report::markdown_table(&rows));
            }
            Ok(())
        }
    }
}
