//! Turn Handler - transition protocol and session lifecycle
//!
//! The handler follows the per-call effects pattern: each method takes an
//! effect reference, the handler itself only carries configuration. All
//! cross-request coordination happens inside the store's conditional
//! commit, never in this process.

use crate::limiter::TransitionLimiter;
use crate::{current_time, map_time_err};
use baton_core::effects::{
    AdvanceGuard, AdvanceOutcome, AdvanceRequest, CloseOutcome, JoinOutcome, LeaveOutcome,
    TurnEffects, TurnStoreEffects,
};
use baton_core::{
    resolve_member_order, score_record, BatonConfig, BatonError, DerivedKind, Event, EventDraft,
    EventKind, Membership, ParticipantId, PhysicalTime, ReliabilityDelta, Result, Role, Session,
    SessionId, SessionStatus, TurnState,
};
use serde::{Deserialize, Serialize};

/// Events included in a snapshot
pub const SNAPSHOT_EVENT_LIMIT: usize = 50;

/// Result of an accepted action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionAccepted {
    /// The appended event
    pub event: Event,
    /// Turn state after the commit
    pub turn: TurnState,
    /// Participant who now holds the turn
    pub next_holder: ParticipantId,
}

/// Authoritative full-state read of a session
///
/// Safe to fetch at any time; feed pushes are only hints to refetch this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session record
    pub session: Session,
    /// Active turn order
    pub order: Vec<ParticipantId>,
    /// Every member, in full turn order (inactive members included)
    pub members: Vec<Membership>,
    /// Current turn, with `holder: None` meaning the privileged slot
    pub turn: TurnState,
    /// Holder with the privileged slot resolved
    pub holder: ParticipantId,
    /// Most recent events, oldest first
    pub recent_events: Vec<Event>,
    /// Last regeneration of the session summary, if any
    pub summary_updated_at: Option<PhysicalTime>,
    /// Last regeneration of the character sheets, if any
    pub characters_updated_at: Option<PhysicalTime>,
}

/// Session lifecycle and the append-and-advance protocol
#[derive(Debug, Clone, Default)]
pub struct TurnHandler {
    limiter: TransitionLimiter,
}

impl TurnHandler {
    /// Create a handler from the service configuration
    pub fn new(config: &BatonConfig) -> Self {
        Self {
            limiter: TransitionLimiter::new(config.rate_limits.clone()),
        }
    }

    async fn require_session<E>(effects: &E, session_id: &SessionId) -> Result<Session>
    where
        E: TurnStoreEffects + ?Sized,
    {
        effects
            .session(session_id)
            .await?
            .ok_or_else(|| BatonError::not_found(format!("session not found: {session_id}")))
    }

    async fn require_member<E>(
        effects: &E,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<Membership>
    where
        E: TurnStoreEffects + ?Sized,
    {
        effects
            .members(session_id)
            .await?
            .into_iter()
            .find(|m| &m.participant_id == participant_id)
            .ok_or_else(|| BatonError::forbidden("not a member of this session"))
    }

    /// Create a session with `privileged` first and `standard` members after
    ///
    /// The turn starts with the privileged participant at index 0 and one
    /// genesis event is logged. That opening turn counts as assigned to the
    /// privileged participant.
    pub async fn create_session<E>(
        &self,
        effects: &E,
        privileged: ParticipantId,
        standard: &[ParticipantId],
    ) -> Result<Session>
    where
        E: TurnEffects + ?Sized,
    {
        let now = current_time(effects).await?;
        let session = Session {
            id: SessionId::new_random(),
            status: SessionStatus::Open,
            privileged,
            created_at: now,
        };

        let mut members = vec![Membership::new(session.id, privileged, Role::Privileged, now)];
        for participant in standard {
            if *participant == privileged || members.iter().any(|m| &m.participant_id == participant)
            {
                continue;
            }
            members.push(Membership::new(session.id, *participant, Role::Standard, now));
        }

        let genesis = EventDraft {
            author: None,
            kind: EventKind::Genesis,
            content: format!("session opened by {privileged}"),
        };
        effects
            .insert_session(session.clone(), members, genesis)
            .await?;
        Self::bump_counters(effects, &[(privileged, ReliabilityDelta::Assigned)], now).await;

        tracing::info!(session_id = %session.id, privileged = %privileged, "session created");
        Ok(session)
    }

    /// Join a session, or rejoin after being marked inactive
    ///
    /// Rejoining clears the inactive flag and the timeout streak.
    pub async fn join_session<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
        participant_id: ParticipantId,
    ) -> Result<Membership>
    where
        E: TurnEffects + ?Sized,
    {
        let now = current_time(effects).await?;
        let candidate = Membership::new(*session_id, participant_id, Role::Standard, now);

        let (membership, notice) = match effects.join_member(candidate).await? {
            JoinOutcome::Joined(membership) => (membership, format!("{participant_id} joined")),
            JoinOutcome::Rejoined(membership) => {
                (membership, format!("{participant_id} rejoined"))
            }
            JoinOutcome::SessionClosed => {
                return Err(BatonError::conflict(format!("session {session_id} is closed")))
            }
            JoinOutcome::SessionNotFound => {
                return Err(BatonError::not_found(format!(
                    "session not found: {session_id}"
                )))
            }
        };

        if let Err(err) = effects
            .append_event(session_id, EventDraft::system(notice), now)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %err, "join notice not recorded");
        }
        Ok(membership)
    }

    /// Leave a session
    ///
    /// If the leaver holds the turn the store hands it on in the same commit.
    /// The privileged participant cannot leave.
    pub async fn leave_session<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
        participant_id: ParticipantId,
    ) -> Result<Option<TurnState>>
    where
        E: TurnEffects + ?Sized,
    {
        let session = Self::require_session(effects, session_id).await?;
        if session.privileged == participant_id {
            return Err(BatonError::forbidden(
                "the privileged participant cannot leave the session",
            ));
        }

        let now = current_time(effects).await?;
        let notice = EventDraft::system(format!("{participant_id} left"));
        match effects
            .leave_member(session_id, &participant_id, notice, now)
            .await?
        {
            LeaveOutcome::Left { advanced, .. } => {
                if let Some(turn) = &advanced {
                    let holder = turn.effective_holder(session.privileged);
                    tracing::debug!(
                        session_id = %session_id,
                        turn_index = turn.turn_index,
                        next_holder = %holder,
                        "turn handed on by departing holder"
                    );
                    Self::bump_counters(effects, &[(holder, ReliabilityDelta::Assigned)], now)
                        .await;
                }
                Ok(advanced)
            }
            LeaveOutcome::NotMember => Err(BatonError::forbidden("not a member of this session")),
            LeaveOutcome::SessionNotFound => Err(BatonError::not_found(format!(
                "session not found: {session_id}"
            ))),
        }
    }

    /// Close a session (privileged only)
    pub async fn close_session<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
        actor: ParticipantId,
    ) -> Result<Event>
    where
        E: TurnEffects + ?Sized,
    {
        let session = Self::require_session(effects, session_id).await?;
        if session.privileged != actor {
            return Err(BatonError::forbidden(
                "only the privileged participant may close the session",
            ));
        }

        let now = current_time(effects).await?;
        let notice = EventDraft::system("session closed");
        match effects.close_session(session_id, notice, now).await? {
            CloseOutcome::Closed(event) => {
                tracing::info!(session_id = %session_id, "session closed");
                Ok(event)
            }
            CloseOutcome::AlreadyClosed => Err(BatonError::conflict(format!(
                "session {session_id} is closed"
            ))),
            CloseOutcome::SessionNotFound => Err(BatonError::not_found(format!(
                "session not found: {session_id}"
            ))),
        }
    }

    /// Record a presence heartbeat
    pub async fn touch_presence<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
        participant_id: ParticipantId,
    ) -> Result<()>
    where
        E: TurnEffects + ?Sized,
    {
        Self::require_session(effects, session_id).await?;
        Self::require_member(effects, session_id, &participant_id).await?;
        let now = current_time(effects).await?;
        effects
            .touch_presence(session_id, &participant_id, now)
            .await?;
        Ok(())
    }

    /// Append an action and advance the turn
    ///
    /// # Errors
    /// * `NotFound` if the session does not exist
    /// * `Forbidden` if the actor is not a member, or narrates without the
    ///   privileged role
    /// * `Invalid` for a non-participant kind, blank content or a content
    ///   policy rejection
    /// * `RateLimited` if any limiter layer rejects the attempt
    /// * `Conflict` if the actor does not hold the turn at commit time or the
    ///   session is closed
    pub async fn append_action<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
        actor: ParticipantId,
        kind: EventKind,
        content: String,
    ) -> Result<ActionAccepted>
    where
        E: TurnEffects + ?Sized,
    {
        let session = Self::require_session(effects, session_id).await?;
        if !session.is_open() {
            return Err(BatonError::conflict(format!("session {session_id} is closed")));
        }
        let member = Self::require_member(effects, session_id, &actor).await?;

        if !kind.is_participant_authored() {
            return Err(BatonError::invalid(format!(
                "event kind `{kind}` cannot be authored by a participant"
            )));
        }
        if kind == EventKind::Narration && !member.is_privileged() {
            return Err(BatonError::forbidden(
                "only the privileged participant may narrate",
            ));
        }
        if content.trim().is_empty() {
            return Err(BatonError::invalid("action content is empty"));
        }
        effects
            .check_content(session_id, &kind, &content)
            .await
            .map_err(|violation| BatonError::invalid(violation.to_string()))?;

        let now = effects.physical_time().await.map_err(map_time_err)?;
        self.limiter.check(effects, session_id, &actor, now).await?;

        let request = AdvanceRequest {
            session_id: *session_id,
            guard: AdvanceGuard::Actor(actor),
            event: EventDraft::authored(actor, kind, content),
            now,
        };
        let commit = match effects.advance_turn(request).await? {
            AdvanceOutcome::Committed(commit) => commit,
            AdvanceOutcome::TurnMismatch { current } => {
                let holder = current.effective_holder(session.privileged);
                return Err(BatonError::conflict(format!(
                    "not your turn: {holder} holds turn {}",
                    current.turn_index
                )));
            }
            AdvanceOutcome::NotMember => {
                return Err(BatonError::forbidden("not a member of this session"))
            }
            AdvanceOutcome::SessionClosed => {
                return Err(BatonError::conflict(format!("session {session_id} is closed")))
            }
            AdvanceOutcome::SessionNotFound => {
                return Err(BatonError::not_found(format!(
                    "session not found: {session_id}"
                )))
            }
        };

        tracing::debug!(
            session_id = %session_id,
            participant_id = %actor,
            turn_index = commit.turn.turn_index,
            next_holder = %commit.next_holder,
            "transition accepted"
        );

        Self::record_side_effects(effects, session_id, actor, commit.next_holder, now).await;

        Ok(ActionAccepted {
            event: commit.event,
            turn: commit.turn,
            next_holder: commit.next_holder,
        })
    }

    /// Reliability counters and presence after a commit; failures are logged
    async fn record_side_effects<E>(
        effects: &E,
        session_id: &SessionId,
        actor: ParticipantId,
        next_holder: ParticipantId,
        now: PhysicalTime,
    ) where
        E: TurnEffects + ?Sized,
    {
        Self::bump_counters(
            effects,
            &[
                (actor, ReliabilityDelta::Taken),
                (next_holder, ReliabilityDelta::Assigned),
            ],
            now,
        )
        .await;
        if let Err(err) = effects.touch_presence(session_id, &actor, now).await {
            tracing::warn!(participant_id = %actor, error = %err, "presence not refreshed");
        }
    }

    /// Best-effort reliability counter updates
    async fn bump_counters<E>(
        effects: &E,
        bumps: &[(ParticipantId, ReliabilityDelta)],
        now: PhysicalTime,
    ) where
        E: TurnEffects + ?Sized,
    {
        for &(participant, delta) in bumps {
            if let Err(err) = effects.bump_reliability(&participant, delta, now).await {
                tracing::warn!(
                    participant_id = %participant,
                    ?delta,
                    error = %err,
                    "reliability counter not updated"
                );
            }
        }
    }

    /// Authoritative full-state read
    pub async fn session_snapshot<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
        viewer: ParticipantId,
    ) -> Result<SessionSnapshot>
    where
        E: TurnEffects + ?Sized,
    {
        let session = Self::require_session(effects, session_id).await?;
        let members = effects.members(session_id).await?;
        if !members.iter().any(|m| m.participant_id == viewer) {
            return Err(BatonError::forbidden("not a member of this session"));
        }
        let turn = effects
            .turn_state(session_id)
            .await?
            .ok_or_else(|| BatonError::internal(format!("session {session_id} has no turn")))?;

        let order = resolve_member_order(&members, false);
        let full_order = resolve_member_order(&members, true);
        let mut members = members;
        members.sort_by_key(|m| {
            full_order
                .iter()
                .position(|id| id == &m.participant_id)
                .unwrap_or(usize::MAX)
        });

        Ok(SessionSnapshot {
            holder: turn.effective_holder(session.privileged),
            recent_events: effects
                .latest_events(session_id, SNAPSHOT_EVENT_LIMIT)
                .await?,
            summary_updated_at: effects
                .derived_updated_at(session_id, DerivedKind::Summary)
                .await?,
            characters_updated_at: effects
                .derived_updated_at(session_id, DerivedKind::Characters)
                .await?,
            session,
            order,
            members,
            turn,
        })
    }

    /// Reliability score of a participant, `None` before any assigned turn
    pub async fn reliability_score<E>(
        &self,
        effects: &E,
        participant_id: &ParticipantId,
    ) -> Result<Option<u8>>
    where
        E: TurnEffects + ?Sized,
    {
        Ok(effects
            .reliability(participant_id)
            .await?
            .as_ref()
            .and_then(score_record))
    }
}
