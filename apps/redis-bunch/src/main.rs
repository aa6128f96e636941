mod config;
mod logging;
mod signals;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use embedded_redis::{Locations, RedisError, Topology, TopologyBuilder};
use serde::Serialize;

use crate::config::AppConfig;

/// Redis Bunch - ephemeral Redis servers, replicas and sentinels
#[derive(Parser)]
#[command(name = "redis-bunch")]
#[command(about = "Redis Bunch - run an ephemeral Redis server/sentinel topology")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Let the OS choose every port (overrides config)
    #[arg(long)]
    ephemeral: bool,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the topology and keep it up until Ctrl+C
    Run,
    /// Validate configuration, print the planned layout and exit
    Check,
}

/// Printed layout of a topology.
#[derive(Serialize)]
struct Layout {
    ephemeral: bool,
    quorum: usize,
    #[serde(flatten)]
    endpoints: Locations<String>,
}

impl Layout {
    /// Best-known endpoints: effective once running, declared before.
    fn of(topology: &Topology) -> Self {
        let endpoints = Locations {
            sentinels: topology
                .sentinels()
                .iter()
                .map(|s| s.instance().planned_endpoint().to_string())
                .collect(),
            masters: topology
                .groups()
                .iter()
                .map(|g| {
                    (
                        g.master_name().to_owned(),
                        g.master().planned_endpoint().to_string(),
                    )
                })
                .collect(),
            slaves: topology
                .groups()
                .iter()
                .map(|g| {
                    (
                        g.master_name().to_owned(),
                        g.slaves()
                            .iter()
                            .map(|s| s.planned_endpoint().to_string())
                            .collect(),
                    )
                })
                .collect(),
        };
        Self {
            ephemeral: topology.is_ephemeral(),
            quorum: topology.quorum(),
            endpoints,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (REDIS_BUNCH__*) -> 4) CLI overrides
    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(cli.verbose, cli.ephemeral);

    logging::init(&config.logging)?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_topology(&config).await,
        Commands::Check => check_config(&config),
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    let topology = TopologyBuilder::from_config(&config.topology)
        .build()
        .context("invalid topology")?;
    println!("Configuration is valid");
    println!("{}", serde_json::to_string_pretty(&Layout::of(&topology))?);
    Ok(())
}

async fn run_topology(config: &AppConfig) -> Result<()> {
    let mut topology = TopologyBuilder::from_config(&config.topology)
        .build()
        .context("invalid topology")?;

    if let Err(e) = topology.start().await {
        report_captured_output(&e);
        return Err(e).context("failed to start topology");
    }

    println!("{}", serde_json::to_string_pretty(&Layout::of(&topology))?);

    let waited = signals::wait_for_shutdown().await;
    topology.stop().await.context("failed to stop topology")?;
    waited.map(|_| ())
}

fn report_captured_output(error: &RedisError) {
    for line in error.captured_output() {
        eprintln!("  | {line}");
    }
}
