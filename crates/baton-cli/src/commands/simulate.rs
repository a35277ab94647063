//! Scripted session on a simulated clock
//!
//! Every participant acts when it holds the turn except the last standard
//! participant, who never does. The watchdog skips their stalled turns until
//! the streak limit benches them, after which the rest play on.

use anyhow::{bail, Context, Result};
use baton_core::effects::{EventLogEffects, TurnStateEffects};
use baton_core::{BatonConfig, EventKind, ParticipantId, SessionId};
use baton_effects::{BatonEffectSystem, SimulatedTimeHandler};
use baton_turns::{TurnHandler, TurnWatchdog};
use clap::Args;
use tracing::info;
use uuid::Uuid;

/// Simulated time between two turns
const STEP_MS: u64 = 1_000;

#[derive(Args)]
pub struct SimulateCommand {
    /// Session size including the privileged participant
    #[arg(short = 'n', long, default_value = "3")]
    pub participants: u16,

    /// Full passes over the turn order
    #[arg(short, long, default_value = "3")]
    pub rounds: u16,
}

/// What a scripted run produced
#[derive(Debug)]
pub struct SimulationOutcome {
    pub effects: BatonEffectSystem<SimulatedTimeHandler>,
    pub session_id: SessionId,
    pub participants: Vec<ParticipantId>,
    pub actions: u32,
    pub skips: u32,
}

pub async fn handle_simulate_command(cmd: SimulateCommand, config: &BatonConfig) -> Result<()> {
    let outcome = run_simulation(cmd.participants, cmd.rounds, config).await?;

    let events = outcome
        .effects
        .events_after(&outcome.session_id, None, usize::MAX)
        .await?;
    for event in &events {
        let author = event
            .author
            .map_or_else(|| "system".to_string(), |id| id.to_string());
        println!(
            "{:>10}ms  {:<8} {author}: {}",
            event.created_at.ts_ms, event.kind, event.content
        );
    }

    let handler = TurnHandler::new(config);
    for participant in &outcome.participants {
        let score = handler
            .reliability_score(&outcome.effects, participant)
            .await?
            .map_or_else(|| "no score".to_string(), |s| s.to_string());
        println!("{participant}: {score}");
    }
    println!("{} actions, {} forced skips", outcome.actions, outcome.skips);
    Ok(())
}

pub async fn run_simulation(
    participants: u16,
    rounds: u16,
    config: &BatonConfig,
) -> Result<SimulationOutcome> {
    if participants == 0 {
        bail!("a session needs at least the privileged participant");
    }
    let effects = BatonEffectSystem::simulated(0);
    let handler = TurnHandler::new(config);
    let watchdog = TurnWatchdog::new(config.watchdog.clone());

    let ids: Vec<ParticipantId> = (1..=u128::from(participants))
        .map(|n| ParticipantId::from_uuid(Uuid::from_u128(n)))
        .collect();
    let privileged = ids[0];
    let absent = (ids.len() > 1).then(|| ids[ids.len() - 1]);
    let session = handler
        .create_session(&effects, privileged, &ids[1..])
        .await?;

    let mut actions = 0;
    let mut skips = 0;
    for round in 1..=rounds {
        for _ in 0..participants {
            effects.clock().advance_time(STEP_MS);
            let turn = effects
                .turn_state(&session.id)
                .await?
                .context("session vanished")?;
            let holder = turn.effective_holder(privileged);

            if Some(holder) == absent {
                effects
                    .clock()
                    .advance_time(config.watchdog.stale_after_ms + 1);
                // The privileged participant stays present while waiting.
                handler
                    .touch_presence(&effects, &session.id, privileged)
                    .await?;
                if let Some(skip) = watchdog.sweep_session(&effects, &session.id).await? {
                    info!(
                        round,
                        skipped = %skip.skipped,
                        escalated = skip.escalated,
                        "forced skip"
                    );
                    skips += 1;
                }
                continue;
            }

            let kind = if holder == privileged {
                EventKind::Narration
            } else {
                EventKind::Action
            };
            handler
                .append_action(
                    &effects,
                    &session.id,
                    holder,
                    kind,
                    format!("round {round}: move by {holder}"),
                )
                .await?;
            actions += 1;
        }
    }

    Ok(SimulationOutcome {
        effects,
        session_id: session.id,
        participants: ids,
        actions,
        skips,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::effects::MembershipEffects;

    #[tokio::test]
    async fn absent_participant_is_benched_after_the_streak_limit() {
        let config = BatonConfig::default();
        let outcome = run_simulation(3, 4, &config).await.unwrap();

        assert_eq!(outcome.skips, config.watchdog.escalate_after);
        let absent = outcome.participants[2];
        let member = outcome
            .effects
            .members(&outcome.session_id)
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.participant_id == absent)
            .unwrap();
        assert!(member.inactive);
        assert_eq!(outcome.actions, 4 * 3 - outcome.skips);
    }

    #[tokio::test]
    async fn solo_session_only_narrates() {
        let outcome = run_simulation(1, 3, &BatonConfig::default()).await.unwrap();
        assert_eq!(outcome.actions, 3);
        assert_eq!(outcome.skips, 0);
    }

    #[tokio::test]
    async fn empty_session_is_rejected() {
        assert!(run_simulation(0, 1, &BatonConfig::default()).await.is_err());
    }
}
