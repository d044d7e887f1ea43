use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "foreman",
    version,
    about = "Task dispatch core with circuit breaking, watchdog requeue and capacity limits"
)]
pub struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler loop against seeded demo tasks and a simulated executor.
    Run(RunArgs),
    /// Validate a config file and print per-host ceilings.
    CheckConfig(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// TOML config file. Built-in defaults when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Stop after this many ticks. Runs until Ctrl-C when omitted.
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Override tick_interval_ms from the config.
    #[arg(long)]
    pub interval_ms: Option<u64>,
}
