//! Operator CLI for Baton
//!
//! Runs the administrative watchdog sweep against a store snapshot, inspects
//! turn order and reliability scores, and plays scripted sessions on a
//! simulated clock.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    common,
    order::{handle_order_command, OrderCommand},
    score::{handle_score_command, ScoreCommand},
    simulate::{handle_simulate_command, SimulateCommand},
    sweep::{handle_sweep_command, SweepCommand},
};

#[derive(Parser)]
#[command(name = "baton")]
#[command(about = "Baton - turn scheduling and liveness for shared sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Force-advance every stalled turn in a store snapshot
    Sweep(SweepCommand),
    /// Resolve the turn order of a roster file
    Order(OrderCommand),
    /// Reliability score from turn counters
    Score(ScoreCommand),
    /// Play a scripted session on a simulated clock
    Simulate(SimulateCommand),
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = common::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sweep(cmd) => handle_sweep_command(cmd, &config).await?,
        Commands::Order(cmd) => handle_order_command(cmd)?,
        Commands::Score(cmd) => handle_score_command(cmd),
        Commands::Simulate(cmd) => handle_simulate_command(cmd, &config).await?,
        Commands::Config => print!("{}", config.to_toml_string()?),
    }

    Ok(())
}
