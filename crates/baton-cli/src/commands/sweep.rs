//! Administrative sweep over a store snapshot

use anyhow::Result;
use baton_core::effects::SessionStoreEffects;
use baton_core::{BatonConfig, SessionId};
use baton_effects::{BatonEffectSystem, MemoryStore, RealTimeHandler, StoreSnapshot};
use baton_turns::{ContinuityChange, ContinuityManager, SweepReport, TurnWatchdog};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args)]
pub struct SweepCommand {
    /// Store snapshot to sweep; rewritten in place
    #[arg(long)]
    pub state: PathBuf,

    /// Report without writing the snapshot back
    #[arg(long)]
    pub dry_run: bool,
}

/// Result of one administrative pass
#[derive(Debug, Default)]
pub struct AdminSweep {
    pub continuity: Vec<(SessionId, ContinuityChange)>,
    pub watchdog: SweepReport,
}

pub async fn handle_sweep_command(cmd: SweepCommand, config: &BatonConfig) -> Result<()> {
    let sweep = sweep_state_file(&cmd.state, config, cmd.dry_run).await?;

    for (session_id, change) in &sweep.continuity {
        println!("{session_id}: {}", serde_json::to_string(change)?);
    }
    for skip in &sweep.watchdog.skipped {
        println!(
            "skipped {} in {} -> {} (turn {}{})",
            skip.skipped,
            skip.session_id,
            skip.next_holder,
            skip.turn_index,
            if skip.escalated { ", marked inactive" } else { "" }
        );
    }
    println!(
        "{} stale, {} skipped, {} failed",
        sweep.watchdog.scanned,
        sweep.watchdog.skipped.len(),
        sweep.watchdog.failed
    );
    Ok(())
}

/// Load, sweep and (unless `dry_run`) save a snapshot
///
/// Continuity runs first so a privileged participant who went away can have
/// their stalled turn skipped in the same pass.
pub async fn sweep_state_file(path: &Path, config: &BatonConfig, dry_run: bool) -> Result<AdminSweep> {
    let snapshot = StoreSnapshot::load_from_file(path)?;
    let store = MemoryStore::from_snapshot(snapshot, &config.store)?;
    let effects = BatonEffectSystem::new(store, RealTimeHandler::new());

    let continuity = ContinuityManager::new(config.continuity.clone());
    let mut changes = Vec::new();
    for session in effects.open_sessions().await? {
        if let Some(change) = continuity.check(&effects, &session.id).await? {
            changes.push((session.id, change));
        }
    }
    let report = TurnWatchdog::new(config.watchdog.clone())
        .sweep_all(&effects)
        .await?;

    if !dry_run {
        effects.store().snapshot().await?.save_to_file(path)?;
    }
    info!(
        path = %path.display(),
        skipped = report.skipped.len(),
        failovers = changes.len(),
        dry_run,
        "administrative sweep finished"
    );
    Ok(AdminSweep {
        continuity: changes,
        watchdog: report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::effects::TurnStateEffects;
    use baton_core::{EventKind, ParticipantId};
    use baton_turns::TurnHandler;
    use uuid::Uuid;

    fn pid(n: u128) -> ParticipantId {
        ParticipantId::from_uuid(Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn sweep_rewrites_an_old_snapshot() {
        // Everything written near the epoch is long stale on the real clock.
        let effects = BatonEffectSystem::simulated(1_000);
        let handler = TurnHandler::default();
        let session = handler
            .create_session(&effects, pid(1), &[pid(2), pid(3)])
            .await
            .unwrap();
        handler
            .append_action(&effects, &session.id, pid(1), EventKind::Narration, "begin".into())
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        effects.store().snapshot().await.unwrap().save_to_file(&path).unwrap();

        let sweep = sweep_state_file(&path, &BatonConfig::default(), false)
            .await
            .unwrap();
        assert_eq!(
            sweep.continuity,
            vec![(session.id, ContinuityChange::FailedOver { participant_id: pid(1) })]
        );
        assert_eq!(sweep.watchdog.skipped.len(), 1);
        assert_eq!(sweep.watchdog.skipped[0].skipped, pid(2));
        assert_eq!(sweep.watchdog.skipped[0].next_holder, pid(3));

        let reloaded = MemoryStore::from_snapshot(
            StoreSnapshot::load_from_file(&path).unwrap(),
            &BatonConfig::default().store,
        )
        .unwrap();
        let turn = reloaded.turn_state(&session.id).await.unwrap().unwrap();
        assert_eq!(turn.holder, Some(pid(3)));
        assert_eq!(turn.turn_index, 2);
    }

    #[tokio::test]
    async fn dry_run_leaves_the_file_alone() {
        let effects = BatonEffectSystem::simulated(1_000);
        TurnHandler::default()
            .create_session(&effects, pid(1), &[pid(2)])
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        effects.store().snapshot().await.unwrap().save_to_file(&path).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let sweep = sweep_state_file(&path, &BatonConfig::default(), true)
            .await
            .unwrap();
        assert_eq!(sweep.continuity.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }
}
