//! Stuck-turn watchdog
//!
//! Force-advances turns idle strictly longer than the stale threshold. There
//! is no scheduler: feed connections call `sweep_session_if_due` on every
//! tick and operators call `sweep_all`. The forced advance reuses the store's
//! conditional commit with a `Stale` guard, so a session that moved between
//! the scan and the commit is left alone.

use crate::{claim_sweep_slot, current_time};
use baton_core::effects::{AdvanceGuard, AdvanceOutcome, AdvanceRequest, TurnEffects};
use baton_core::{
    EventDraft, ParticipantId, PhysicalTime, ReliabilityDelta, Result, Role, SessionId,
    WatchdogConfig,
};
use serde::{Deserialize, Serialize};

/// Store counter scope throttling opportunistic sweeps
pub const WATCHDOG_SCOPE: &str = "watchdog";

/// One forced skip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogSkip {
    /// Session whose turn was skipped
    pub session_id: SessionId,
    /// Holder whose turn was skipped
    pub skipped: ParticipantId,
    /// Participant who holds the turn after the skip
    pub next_holder: ParticipantId,
    /// Turn index after the skip
    pub turn_index: u64,
    /// Whether the skipped participant was marked inactive by this skip
    pub escalated: bool,
}

/// Outcome of an operator sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Stale sessions examined
    pub scanned: usize,
    /// Skips committed by this sweep
    pub skipped: Vec<WatchdogSkip>,
    /// Sessions whose sweep failed
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TurnWatchdog {
    config: WatchdogConfig,
}

impl TurnWatchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self { config }
    }

    /// Sweep a session unless another caller swept it within the minimum
    /// interval
    pub async fn sweep_session_if_due<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
    ) -> Result<Option<WatchdogSkip>>
    where
        E: TurnEffects + ?Sized,
    {
        let now = current_time(effects).await?;
        if !claim_sweep_slot(
            effects,
            WATCHDOG_SCOPE,
            session_id,
            self.config.min_interval(),
            now,
        )
        .await?
        {
            return Ok(None);
        }
        self.sweep_session(effects, session_id).await
    }

    /// Check one session and force-advance it if its turn is stale
    pub async fn sweep_session<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
    ) -> Result<Option<WatchdogSkip>>
    where
        E: TurnEffects + ?Sized,
    {
        let Some(session) = effects.session(session_id).await? else {
            return Ok(None);
        };
        if !session.is_open() {
            return Ok(None);
        }
        let Some(turn) = effects.turn_state(session_id).await? else {
            return Ok(None);
        };

        let now = current_time(effects).await?;
        if !turn.updated_at.is_stale(now, self.config.stale_after()) {
            return Ok(None);
        }

        let holder = turn.effective_holder(session.privileged);
        let members = effects.members(session_id).await?;
        let holder_member = members.iter().find(|m| m.participant_id == holder);
        let holder_role = holder_member.map_or(Role::Standard, |m| m.role);
        if holder_role == Role::Privileged {
            // The privileged role recovers through presence; only a turn held
            // while that role is in failover is skipped here.
            let in_failover = holder_member.is_some_and(|m| m.inactive);
            if !(self.config.force_privileged || in_failover) {
                return Ok(None);
            }
        }

        let idle = now.since(turn.updated_at);
        let request = AdvanceRequest {
            session_id: *session_id,
            guard: AdvanceGuard::Stale {
                holder: turn.holder,
                stale_before: now.saturating_sub(self.config.stale_after()),
            },
            event: EventDraft::system(format!(
                "turn of {holder} skipped after {}s without action",
                idle.as_secs()
            )),
            now,
        };

        let commit = match effects.advance_turn(request).await? {
            AdvanceOutcome::Committed(commit) => commit,
            AdvanceOutcome::TurnMismatch { .. } => {
                tracing::debug!(session_id = %session_id, "turn moved before forced skip");
                return Ok(None);
            }
            AdvanceOutcome::NotMember
            | AdvanceOutcome::SessionClosed
            | AdvanceOutcome::SessionNotFound => return Ok(None),
        };

        tracing::info!(
            session_id = %session_id,
            participant_id = %holder,
            next_holder = %commit.next_holder,
            turn_index = commit.turn.turn_index,
            "stalled turn force-advanced"
        );

        let escalated = if holder_role == Role::Standard {
            self.record_timeout(effects, session_id, holder, now).await
        } else {
            false
        };
        Self::bump(effects, holder, ReliabilityDelta::TimedOut, now).await;
        Self::bump(effects, commit.next_holder, ReliabilityDelta::Assigned, now).await;

        Ok(Some(WatchdogSkip {
            session_id: *session_id,
            skipped: holder,
            next_holder: commit.next_holder,
            turn_index: commit.turn.turn_index,
            escalated,
        }))
    }

    /// Streak bookkeeping after a skip; failures are logged, never returned
    async fn record_timeout<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
        participant: ParticipantId,
        now: PhysicalTime,
    ) -> bool
    where
        E: TurnEffects + ?Sized,
    {
        let outcome = match effects
            .record_timeout(session_id, &participant, self.config.escalate_after)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    participant_id = %participant,
                    error = %err,
                    "timeout streak not recorded"
                );
                return false;
            }
        };
        if !outcome.escalated {
            return false;
        }

        tracing::info!(
            session_id = %session_id,
            participant_id = %participant,
            streak = outcome.streak,
            "participant marked inactive"
        );
        let notice = EventDraft::system(format!(
            "{participant} marked inactive after {} consecutive timeouts",
            outcome.streak
        ));
        if let Err(err) = effects.append_event(session_id, notice, now).await {
            tracing::warn!(session_id = %session_id, error = %err, "escalation notice not recorded");
        }
        true
    }

    async fn bump<E>(effects: &E, participant: ParticipantId, delta: ReliabilityDelta, now: PhysicalTime)
    where
        E: TurnEffects + ?Sized,
    {
        if let Err(err) = effects.bump_reliability(&participant, delta, now).await {
            tracing::warn!(
                participant_id = %participant,
                ?delta,
                error = %err,
                "reliability counter not updated"
            );
        }
    }

    /// Operator sweep over every open session, ignoring the throttle
    pub async fn sweep_all<E>(&self, effects: &E) -> Result<SweepReport>
    where
        E: TurnEffects + ?Sized,
    {
        let now = current_time(effects).await?;
        let stale = effects
            .stale_turns(now.saturating_sub(self.config.stale_after()))
            .await?;

        let mut report = SweepReport {
            scanned: stale.len(),
            ..SweepReport::default()
        };
        for turn in stale {
            match self.sweep_session(effects, &turn.session_id).await {
                Ok(Some(skip)) => report.skipped.push(skip),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(session_id = %turn.session_id, error = %err, "sweep failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
