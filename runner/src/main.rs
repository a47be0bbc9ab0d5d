//! Runs one configured dump job once.
//!
//! Configuration is read from `configuration/` in the working directory (see the `config`
//! crate); which partitions are drained is decided by the `--arg` values. Configured jobs cannot
//! attach lifecycle hooks, so derived common parameters have to be passed as `--arg` values too.

use anyhow::Context;
use clap::{Parser, Subcommand};
use telemetry::tracing::init_tracing;
use tracing::error;

use crate::args::parse_run_args;
use crate::core::{list_jobs, run_job};

mod args;
mod core;

#[derive(Debug, Parser)]
#[command(name = "runner", version, about, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists the configured jobs.
    List,
    /// Drains the counter of a job into its destinations.
    Run {
        /// Name of the job to run.
        job: String,
        /// Run argument as `key=value`, e.g. `--arg date=2015-01-19`. Repeatable.
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(env!("CARGO_BIN_NAME")).context("failed to initialize tracing")?;

    let cli = Cli::parse();
    let result = match cli.command {
        Command::List => list_jobs(),
        Command::Run { job, args } => match parse_run_args(&args) {
            Ok(args) => run_job(&job, args).await,
            Err(err) => Err(err),
        },
    };

    if let Err(err) = &result {
        error!("runner failed: {err:#}");
    }

    result
}
