mod cli;
mod config;
mod simulate;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use foreman_core::ForemanBuilder;
use foreman_core::app::capacity::{auto_ceiling, clamp_ceiling};
use foreman_core::ports::{Clock, SystemClock};

use crate::cli::{Cli, Command, ConfigArgs, RunArgs};
use crate::config::load_config;
use crate::simulate::{SimulatedExecutor, seed_demo_tasks, spawn_runner};
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::CheckConfig(args) => check_config(args),
    }
}

fn check_config(args: ConfigArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    println!("config ok");
    for host in &config.hosts {
        let auto = auto_ceiling(host, &config.capacity);
        let ceiling = clamp_ceiling(auto, config.capacity.max_seats_override);
        println!(
            "  {:<8} cpu={:<5} mem={:>6}MB  auto={:<3} ceiling={:<3} reserve={}",
            host.name.as_str(),
            host.cpu_cores,
            host.total_mem_mb,
            auto,
            ceiling,
            config.capacity.interactive_reserve
        );
        if ceiling <= config.capacity.interactive_reserve {
            println!(
                "  warning: {} has no autonomous seats (ceiling {} <= interactive_reserve {})",
                host.name.as_str(),
                ceiling,
                config.capacity.interactive_reserve
            );
        }
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.config.as_deref())?;
    if let Some(ms) = args.interval_ms {
        config.tick_interval_ms = ms;
    }
    let run_time = config.tick_interval() / 2;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (executor, runs) = SimulatedExecutor::channel();
    let foreman = ForemanBuilder::new(config)
        .executor(executor)
        .clock(Arc::clone(&clock))
        .build()
        .context("building foreman")?;

    let seeded = seed_demo_tasks(&foreman, clock.as_ref()).await?;
    info!(seeded, "demo tasks inserted");

    let runner = spawn_runner(Arc::clone(&foreman.dispatcher), runs, run_time);
    let scheduler = foreman.scheduler(args.ticks);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let stats = loop {
        if scheduler.is_finished() {
            break scheduler.join().await;
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("ctrl-c received, stopping");
                break scheduler.shutdown_and_join().await;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    };

    // let in-flight simulated runs report before the summary
    tokio::time::sleep(run_time + Duration::from_millis(50)).await;
    runner.abort();

    let status = foreman.status().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
