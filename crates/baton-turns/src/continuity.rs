//! Continuity manager
//!
//! Presence-driven failover for the privileged role. A privileged participant
//! whose last heartbeat is stale is flagged inactive so standard participants
//! keep taking turns; a fresh heartbeat clears the flag. Notices are written
//! only by the caller whose store update actually flipped the flag, so any
//! number of observers may run the check concurrently.

use crate::{claim_sweep_slot, current_time};
use baton_core::effects::TurnEffects;
use baton_core::{ContinuityConfig, EventDraft, ParticipantId, PhysicalTime, Result, SessionId};
use serde::{Deserialize, Serialize};

/// Store counter scope throttling opportunistic checks
pub const CONTINUITY_SCOPE: &str = "continuity";

/// A flag flip performed by a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContinuityChange {
    /// Presence went stale; the privileged participant left the active order
    FailedOver { participant_id: ParticipantId },
    /// Presence refreshed; the privileged participant is active again
    Restored { participant_id: ParticipantId },
}

#[derive(Debug, Clone, Default)]
pub struct ContinuityManager {
    config: ContinuityConfig,
}

impl ContinuityManager {
    pub fn new(config: ContinuityConfig) -> Self {
        Self { config }
    }

    /// Run `check` unless it ran for this session within the minimum interval
    pub async fn check_if_due<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
    ) -> Result<Option<ContinuityChange>>
    where
        E: TurnEffects + ?Sized,
    {
        let now = current_time(effects).await?;
        if !claim_sweep_slot(
            effects,
            CONTINUITY_SCOPE,
            session_id,
            self.config.min_interval(),
            now,
        )
        .await?
        {
            return Ok(None);
        }
        self.check(effects, session_id).await
    }

    /// Reconcile the privileged participant's inactive flag with presence
    ///
    /// A privileged participant who never sent a heartbeat is measured from
    /// session creation.
    pub async fn check<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
    ) -> Result<Option<ContinuityChange>>
    where
        E: TurnEffects + ?Sized,
    {
        let Some(session) = effects.session(session_id).await? else {
            return Ok(None);
        };
        if !session.is_open() {
            return Ok(None);
        }
        let privileged = session.privileged;
        let Some(member) = effects
            .members(session_id)
            .await?
            .into_iter()
            .find(|m| m.participant_id == privileged)
        else {
            return Ok(None);
        };

        let now = current_time(effects).await?;
        let last_seen = effects
            .last_seen(session_id, &privileged)
            .await?
            .unwrap_or(session.created_at);
        let stale = last_seen.is_stale(now, self.config.stale_after());

        let change = match (stale, member.inactive) {
            (true, false) => ContinuityChange::FailedOver {
                participant_id: privileged,
            },
            (false, true) => ContinuityChange::Restored {
                participant_id: privileged,
            },
            _ => return Ok(None),
        };

        if !effects
            .set_member_inactive(session_id, &privileged, stale)
            .await?
        {
            // Another observer flipped it first.
            return Ok(None);
        }

        let notice = match change {
            ContinuityChange::FailedOver { .. } => {
                tracing::info!(session_id = %session_id, participant_id = %privileged, "privileged participant failed over");
                format!(
                    "{privileged} has been away for {}s; play continues without them",
                    now.since(last_seen).as_secs()
                )
            }
            ContinuityChange::Restored { .. } => {
                tracing::info!(session_id = %session_id, participant_id = %privileged, "privileged participant restored");
                format!("{privileged} is back")
            }
        };
        Self::notify(effects, session_id, notice, now).await;
        Ok(Some(change))
    }

    async fn notify<E>(effects: &E, session_id: &SessionId, notice: String, now: PhysicalTime)
    where
        E: TurnEffects + ?Sized,
    {
        if let Err(err) = effects
            .append_event(session_id, EventDraft::system(notice), now)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %err, "continuity notice not recorded");
        }
    }
}
