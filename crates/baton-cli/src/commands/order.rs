//! Turn order inspection

use anyhow::{Context, Result};
use baton_core::{resolve_order, OrderCandidate};
use clap::Args;
use std::path::PathBuf;

/// Resolve the order of a JSON roster
///
/// The roster is an array of
/// `{"id": "<uuid>", "role": "privileged"|"standard", "joined_at": {"ts_ms": 0} | null, "inactive": false}`.
#[derive(Args)]
pub struct OrderCommand {
    #[arg(long)]
    pub roster: PathBuf,

    /// Keep inactive members in the output
    #[arg(long)]
    pub include_inactive: bool,
}

pub fn handle_order_command(cmd: OrderCommand) -> Result<()> {
    let text = std::fs::read_to_string(&cmd.roster)
        .with_context(|| format!("reading roster {}", cmd.roster.display()))?;
    let candidates: Vec<OrderCandidate> =
        serde_json::from_str(&text).context("parsing roster")?;
    for (position, id) in resolve_order(&candidates, cmd.include_inactive)
        .iter()
        .enumerate()
    {
        println!("{position}\t{id}");
    }
    Ok(())
}
