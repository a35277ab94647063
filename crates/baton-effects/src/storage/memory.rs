//! In-memory transactional store
//!
//! Every operation runs inside one `tokio::sync::Mutex` critical section,
//! which stands in for a row lock spanning read, append and write. Entering
//! the section is bounded by the configured lock timeout, the in-process
//! equivalent of a statement timeout. The section is never held across an
//! `.await` on anything other than the lock itself.

use crate::storage::snapshot::StoreState;
use async_trait::async_trait;
use baton_core::effects::{
    AdvanceGuard, AdvanceOutcome, AdvanceRequest, CloseOutcome, DerivedStateEffects,
    EventLogEffects, JoinOutcome, LeaveOutcome, MembershipEffects, PresenceEffects,
    RateLimitStoreEffects, ReliabilityLedgerEffects, SessionStoreEffects, StoreResult,
    TimeoutOutcome, TurnCommit, TurnStateEffects,
};
use baton_core::order::{holder_slot, next_holder, OrderCandidate};
use baton_core::rate_limit::{apply_window, RateLimitKey, RateLimitResult, WindowPolicy};
use baton_core::{
    DerivedKind, Event, EventCursor, EventDraft, Membership, ParticipantId, PhysicalTime,
    ReliabilityDelta, ReliabilityRecord, Role, Session, SessionId, SessionStatus, StoreConfig,
    StoreError, TurnState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// In-memory store handler
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(config: &StoreConfig) -> Self {
        Self::from_state(StoreState::default(), config)
    }

    pub(crate) fn from_state(state: StoreState, config: &StoreConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            lock_timeout: config.lock_timeout(),
        }
    }

    pub(crate) async fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        tokio::time::timeout(self.lock_timeout, self.state.lock())
            .await
            .map_err(|_| {
                let timeout_ms = u64::try_from(self.lock_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(timeout_ms, "store lock wait timed out");
                StoreError::LockTimeout { timeout_ms }
            })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

fn candidates(members: &[Membership]) -> Vec<OrderCandidate> {
    members.iter().map(OrderCandidate::from).collect()
}

fn guard_holds(guard: &AdvanceGuard, turn: &TurnState, privileged: ParticipantId) -> bool {
    match guard {
        AdvanceGuard::Actor(actor) => turn.is_held_by(*actor, privileged),
        AdvanceGuard::Stale {
            holder,
            stale_before,
        } => turn.holder == *holder && turn.updated_at < *stale_before,
    }
}

impl StoreState {
    /// Append with an order key strictly after every existing event
    fn push_event(&mut self, session_id: SessionId, draft: EventDraft, now: PhysicalTime) -> Event {
        let log = self.events.entry(session_id).or_default();
        let created_at = log.last().map_or(now, |last| last.created_at.max(now));
        self.next_event_id = self.next_event_id.next();
        let event = Event {
            id: self.next_event_id,
            session_id,
            author: draft.author,
            kind: draft.kind,
            content: draft.content,
            created_at,
        };
        log.push(event.clone());
        event
    }

    fn member_mut(
        &mut self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Option<&mut Membership> {
        self.members
            .get_mut(session_id)?
            .iter_mut()
            .find(|m| &m.participant_id == participant_id)
    }

    fn turn_for(&self, session_id: &SessionId) -> StoreResult<TurnState> {
        self.turns
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt {
                reason: format!("session {session_id} has no turn state"),
            })
    }
}

#[async_trait]
impl SessionStoreEffects for MemoryStore {
    async fn insert_session(
        &self,
        session: Session,
        members: Vec<Membership>,
        genesis: EventDraft,
    ) -> StoreResult<(TurnState, Event)> {
        let mut state = self.lock().await?;
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::AlreadyExists {
                what: session.id.to_string(),
            });
        }
        let privileged_count = members.iter().filter(|m| m.role == Role::Privileged).count();
        if privileged_count != 1 || !members.iter().any(|m| m.participant_id == session.privileged)
        {
            return Err(StoreError::Corrupt {
                reason: format!("session {} needs exactly one privileged member", session.id),
            });
        }

        let turn = TurnState {
            session_id: session.id,
            holder: None,
            turn_index: 0,
            updated_at: session.created_at,
        };
        state.turns.insert(session.id, turn.clone());
        state.members.insert(session.id, members);
        let genesis = state.push_event(session.id, genesis, session.created_at);
        tracing::debug!(session = %session.id, "session inserted");
        state.sessions.insert(session.id, session);
        Ok((turn, genesis))
    }

    async fn session(&self, session_id: &SessionId) -> StoreResult<Option<Session>> {
        let state = self.lock().await?;
        Ok(state.sessions.get(session_id).cloned())
    }

    async fn close_session(
        &self,
        session_id: &SessionId,
        notice: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<CloseOutcome> {
        let mut state = self.lock().await?;
        let Some(session) = state.sessions.get_mut(session_id) else {
            return Ok(CloseOutcome::SessionNotFound);
        };
        if !session.is_open() {
            return Ok(CloseOutcome::AlreadyClosed);
        }
        session.status = SessionStatus::Closed;

        let mut turn = state.turn_for(session_id)?;
        turn.holder = None;
        turn.updated_at = turn.updated_at.max(now);
        state.turns.insert(*session_id, turn);

        Ok(CloseOutcome::Closed(state.push_event(*session_id, notice, now)))
    }

    async fn open_sessions(&self) -> StoreResult<Vec<Session>> {
        let state = self.lock().await?;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.is_open())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MembershipEffects for MemoryStore {
    async fn members(&self, session_id: &SessionId) -> StoreResult<Vec<Membership>> {
        let state = self.lock().await?;
        Ok(state.members.get(session_id).cloned().unwrap_or_default())
    }

    async fn join_member(&self, membership: Membership) -> StoreResult<JoinOutcome> {
        let mut state = self.lock().await?;
        match state.sessions.get(&membership.session_id) {
            None => return Ok(JoinOutcome::SessionNotFound),
            Some(session) if !session.is_open() => return Ok(JoinOutcome::SessionClosed),
            Some(_) => {}
        }

        if let Some(existing) =
            state.member_mut(&membership.session_id, &membership.participant_id)
        {
            existing.inactive = false;
            existing.timeout_streak = 0;
            return Ok(JoinOutcome::Rejoined(existing.clone()));
        }

        state
            .members
            .entry(membership.session_id)
            .or_default()
            .push(membership.clone());
        Ok(JoinOutcome::Joined(membership))
    }

    async fn leave_member(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        notice: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<LeaveOutcome> {
        let mut state = self.lock().await?;
        let Some(session) = state.sessions.get(session_id).cloned() else {
            return Ok(LeaveOutcome::SessionNotFound);
        };
        let members = state.members.get(session_id).cloned().unwrap_or_default();
        if !members.iter().any(|m| &m.participant_id == participant_id) {
            return Ok(LeaveOutcome::NotMember);
        }

        let mut turn = state.turn_for(session_id)?;
        let mut advanced = None;
        if session.is_open() && turn.is_held_by(*participant_id, session.privileged) {
            // Seat the leaver as inactive so the hand-off starts from their slot.
            let mut seats = candidates(&members);
            for seat in seats.iter_mut().filter(|c| &c.id == participant_id) {
                seat.inactive = true;
            }
            let next = next_holder(&seats, *participant_id, session.privileged);
            turn.holder = holder_slot(next, session.privileged);
            turn.turn_index += 1;
            turn.updated_at = turn.updated_at.max(now);
            state.turns.insert(*session_id, turn.clone());
            advanced = Some(turn);
        }

        if let Some(list) = state.members.get_mut(session_id) {
            list.retain(|m| &m.participant_id != participant_id);
        }
        if let Some(seen) = state.presence.get_mut(session_id) {
            seen.remove(participant_id);
        }
        let notice = state.push_event(*session_id, notice, now);
        Ok(LeaveOutcome::Left { advanced, notice })
    }

    async fn set_member_inactive(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        inactive: bool,
    ) -> StoreResult<bool> {
        let mut state = self.lock().await?;
        let Some(member) = state.member_mut(session_id, participant_id) else {
            return Ok(false);
        };
        if member.inactive == inactive {
            return Ok(false);
        }
        member.inactive = inactive;
        Ok(true)
    }

    async fn record_timeout(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        escalate_at: u32,
    ) -> StoreResult<TimeoutOutcome> {
        let mut state = self.lock().await?;
        let Some(member) = state.member_mut(session_id, participant_id) else {
            return Ok(TimeoutOutcome {
                streak: 0,
                escalated: false,
            });
        };
        member.timeout_streak = member.timeout_streak.saturating_add(1);
        let escalated = member.role == Role::Standard
            && !member.inactive
            && member.timeout_streak >= escalate_at;
        if escalated {
            member.inactive = true;
        }
        Ok(TimeoutOutcome {
            streak: member.timeout_streak,
            escalated,
        })
    }
}

#[async_trait]
impl TurnStateEffects for MemoryStore {
    async fn turn_state(&self, session_id: &SessionId) -> StoreResult<Option<TurnState>> {
        let state = self.lock().await?;
        Ok(state.turns.get(session_id).cloned())
    }

    async fn advance_turn(&self, request: AdvanceRequest) -> StoreResult<AdvanceOutcome> {
        let AdvanceRequest {
            session_id,
            guard,
            event,
            now,
        } = request;

        let mut state = self.lock().await?;
        let Some(session) = state.sessions.get(&session_id).cloned() else {
            return Ok(AdvanceOutcome::SessionNotFound);
        };
        if !session.is_open() {
            return Ok(AdvanceOutcome::SessionClosed);
        }

        let previous = state.turn_for(&session_id)?;
        let members = state.members.get(&session_id).cloned().unwrap_or_default();
        if let AdvanceGuard::Actor(actor) = &guard {
            if !members.iter().any(|m| &m.participant_id == actor) {
                return Ok(AdvanceOutcome::NotMember);
            }
        }
        if !guard_holds(&guard, &previous, session.privileged) {
            return Ok(AdvanceOutcome::TurnMismatch { current: previous });
        }

        // Next holder comes from the membership as it stands inside the lock.
        let previous_holder = previous.effective_holder(session.privileged);
        let next = next_holder(&candidates(&members), previous_holder, session.privileged);

        let event = state.push_event(session_id, event, now);
        let turn = TurnState {
            session_id,
            holder: holder_slot(next, session.privileged),
            turn_index: previous.turn_index + 1,
            updated_at: previous.updated_at.max(now),
        };
        state.turns.insert(session_id, turn.clone());

        // An explicit action ends a timeout streak.
        if let AdvanceGuard::Actor(actor) = guard {
            if let Some(member) = state.member_mut(&session_id, &actor) {
                member.timeout_streak = 0;
            }
        }

        Ok(AdvanceOutcome::Committed(TurnCommit {
            event,
            previous,
            turn,
            next_holder: next,
            previous_holder,
        }))
    }

    async fn stale_turns(&self, stale_before: PhysicalTime) -> StoreResult<Vec<TurnState>> {
        let state = self.lock().await?;
        Ok(state
            .turns
            .values()
            .filter(|t| t.updated_at < stale_before)
            .filter(|t| {
                state
                    .sessions
                    .get(&t.session_id)
                    .is_some_and(Session::is_open)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventLogEffects for MemoryStore {
    async fn append_event(
        &self,
        session_id: &SessionId,
        draft: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<Event> {
        let mut state = self.lock().await?;
        if !state.sessions.contains_key(session_id) {
            return Err(StoreError::Backend {
                reason: format!("append to unknown session {session_id}"),
            });
        }
        Ok(state.push_event(*session_id, draft, now))
    }

    async fn events_after(
        &self,
        session_id: &SessionId,
        after: Option<EventCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Event>> {
        let state = self.lock().await?;
        let Some(log) = state.events.get(session_id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .iter()
            .filter(|e| after.map_or(true, |cursor| e.cursor() > cursor))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_events(&self, session_id: &SessionId, limit: usize) -> StoreResult<Vec<Event>> {
        let state = self.lock().await?;
        let Some(log) = state.events.get(session_id) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }
}

#[async_trait]
impl PresenceEffects for MemoryStore {
    async fn touch_presence(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        now: PhysicalTime,
    ) -> StoreResult<()> {
        let mut state = self.lock().await?;
        let seen = state
            .presence
            .entry(*session_id)
            .or_default()
            .entry(*participant_id)
            .or_insert(now);
        *seen = (*seen).max(now);
        Ok(())
    }

    async fn last_seen(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> StoreResult<Option<PhysicalTime>> {
        let state = self.lock().await?;
        Ok(state
            .presence
            .get(session_id)
            .and_then(|seen| seen.get(participant_id))
            .copied())
    }
}

#[async_trait]
impl ReliabilityLedgerEffects for MemoryStore {
    async fn bump_reliability(
        &self,
        participant_id: &ParticipantId,
        delta: ReliabilityDelta,
        now: PhysicalTime,
    ) -> StoreResult<ReliabilityRecord> {
        let mut state = self.lock().await?;
        let record = state
            .reliability
            .entry(*participant_id)
            .or_insert_with(|| ReliabilityRecord::empty(*participant_id, now));
        record.apply(delta, now);
        Ok(record.clone())
    }

    async fn reliability(
        &self,
        participant_id: &ParticipantId,
    ) -> StoreResult<Option<ReliabilityRecord>> {
        let state = self.lock().await?;
        Ok(state.reliability.get(participant_id).cloned())
    }
}

#[async_trait]
impl RateLimitStoreEffects for MemoryStore {
    async fn hit_rate_limit(
        &self,
        key: &RateLimitKey,
        policy: WindowPolicy,
        now: PhysicalTime,
    ) -> StoreResult<RateLimitResult> {
        let mut state = self.lock().await?;
        let (counter, decision) = apply_window(state.rate_limits.get(key.as_str()), key, policy, now);
        state.rate_limits.insert(counter.key.clone(), counter);
        Ok(decision)
    }
}

#[async_trait]
impl DerivedStateEffects for MemoryStore {
    async fn mark_derived_updated(
        &self,
        session_id: &SessionId,
        kind: DerivedKind,
        now: PhysicalTime,
    ) -> StoreResult<()> {
        let mut state = self.lock().await?;
        let slot = state
            .derived
            .entry(*session_id)
            .or_default()
            .entry(kind)
            .or_insert(now);
        *slot = (*slot).max(now);
        Ok(())
    }

    async fn derived_updated_at(
        &self,
        session_id: &SessionId,
        kind: DerivedKind,
    ) -> StoreResult<Option<PhysicalTime>> {
        let state = self.lock().await?;
        Ok(state
            .derived
            .get(session_id)
            .and_then(|views| views.get(&kind))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::EventKind;
    use uuid::Uuid;

    fn pid(n: u128) -> ParticipantId {
        ParticipantId::from_uuid(Uuid::from_u128(n))
    }

    fn at(ms: u64) -> PhysicalTime {
        PhysicalTime::from_millis(ms)
    }

    async fn seeded(standard: &[u128]) -> (MemoryStore, SessionId) {
        let store = MemoryStore::default();
        let sid = SessionId::from_uuid(Uuid::from_u128(42));
        let session = Session {
            id: sid,
            status: SessionStatus::Open,
            privileged: pid(1),
            created_at: at(0),
        };
        let mut members = vec![Membership::new(sid, pid(1), Role::Privileged, at(0))];
        for (i, n) in standard.iter().enumerate() {
            members.push(Membership::new(sid, pid(*n), Role::Standard, at(10 + i as u64)));
        }
        store
            .insert_session(session, members, EventDraft::system("genesis"))
            .await
            .unwrap();
        (store, sid)
    }

    fn act(sid: SessionId, actor: u128, now: u64) -> AdvanceRequest {
        AdvanceRequest {
            session_id: sid,
            guard: AdvanceGuard::Actor(pid(actor)),
            event: EventDraft::authored(pid(actor), EventKind::Action, "go"),
            now: at(now),
        }
    }

    #[tokio::test]
    async fn insert_initializes_turn_and_genesis() {
        let (store, sid) = seeded(&[2]).await;
        let turn = store.turn_state(&sid).await.unwrap().unwrap();
        assert_eq!(turn.holder, None);
        assert_eq!(turn.turn_index, 0);

        let events = store.events_after(&sid, None, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].author, None);
    }

    #[tokio::test]
    async fn duplicate_session_is_rejected() {
        let (store, sid) = seeded(&[]).await;
        let again = Session {
            id: sid,
            status: SessionStatus::Open,
            privileged: pid(1),
            created_at: at(0),
        };
        let members = vec![Membership::new(sid, pid(1), Role::Privileged, at(0))];
        let err = store
            .insert_session(again, members, EventDraft::system("genesis"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn advance_rotates_through_members() {
        let (store, sid) = seeded(&[2, 3]).await;

        for (actor, expected_holder, index) in [(1, Some(2), 1), (2, Some(3), 2), (3, None, 3)] {
            let AdvanceOutcome::Committed(commit) =
                store.advance_turn(act(sid, actor, index * 100)).await.unwrap()
            else {
                panic!("expected commit for actor {actor}");
            };
            assert_eq!(commit.turn.holder, expected_holder.map(pid));
            assert_eq!(commit.turn.turn_index, index);
        }
    }

    #[tokio::test]
    async fn out_of_turn_actor_sees_mismatch() {
        let (store, sid) = seeded(&[2]).await;
        let outcome = store.advance_turn(act(sid, 2, 5)).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::TurnMismatch { .. }));

        let outcome = store.advance_turn(act(sid, 99, 5)).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::NotMember);
    }

    #[tokio::test]
    async fn stale_guard_rechecks_at_commit_time() {
        let (store, sid) = seeded(&[2]).await;
        store.advance_turn(act(sid, 1, 1_000)).await.unwrap();

        // Exactly at the cut-off is not stale.
        let request = AdvanceRequest {
            session_id: sid,
            guard: AdvanceGuard::Stale {
                holder: Some(pid(2)),
                stale_before: at(1_000),
            },
            event: EventDraft::system("skip"),
            now: at(301_000),
        };
        let outcome = store.advance_turn(request.clone()).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::TurnMismatch { .. }));

        let request = AdvanceRequest {
            guard: AdvanceGuard::Stale {
                holder: Some(pid(2)),
                stale_before: at(1_001),
            },
            ..request
        };
        let outcome = store.advance_turn(request).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Committed(_)));
    }

    #[tokio::test]
    async fn event_order_key_stays_monotonic_under_clock_skew() {
        let (store, sid) = seeded(&[2]).await;
        let later = store
            .append_event(&sid, EventDraft::system("a"), at(500))
            .await
            .unwrap();
        let skewed = store
            .append_event(&sid, EventDraft::system("b"), at(400))
            .await
            .unwrap();
        assert!(skewed.cursor() > later.cursor());

        let after = store
            .events_after(&sid, Some(later.cursor()), 10)
            .await
            .unwrap();
        assert_eq!(after, vec![skewed]);
    }

    #[tokio::test]
    async fn concurrent_actors_commit_exactly_once() {
        let (store, sid) = seeded(&[2, 3]).await;
        let attempts = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.advance_turn(act(sid, 1, 50)).await })
        });
        let outcomes = futures::future::join_all(attempts).await;
        let committed = outcomes
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .filter(|o| matches!(o, AdvanceOutcome::Committed(_)))
            .count();
        assert_eq!(committed, 1);

        let turn = store.turn_state(&sid).await.unwrap().unwrap();
        assert_eq!(turn.turn_index, 1);
        let events = store.events_after(&sid, None, 100).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn leaving_holder_hands_turn_on() {
        let (store, sid) = seeded(&[2, 3]).await;
        store.advance_turn(act(sid, 1, 10)).await.unwrap();

        let outcome = store
            .leave_member(&sid, &pid(2), EventDraft::system("left"), at(20))
            .await
            .unwrap();
        let LeaveOutcome::Left { advanced, .. } = outcome else {
            panic!("expected leave");
        };
        let turn = advanced.unwrap();
        assert_eq!(turn.holder, Some(pid(3)));
        assert_eq!(turn.turn_index, 2);
        assert_eq!(store.members(&sid).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn timeout_streak_escalates_standard_once() {
        let (store, sid) = seeded(&[2]).await;
        let first = store.record_timeout(&sid, &pid(2), 2).await.unwrap();
        assert_eq!((first.streak, first.escalated), (1, false));
        let second = store.record_timeout(&sid, &pid(2), 2).await.unwrap();
        assert_eq!((second.streak, second.escalated), (2, true));
        let third = store.record_timeout(&sid, &pid(2), 2).await.unwrap();
        assert!(!third.escalated);

        let privileged = store.record_timeout(&sid, &pid(1), 1).await.unwrap();
        assert!(!privileged.escalated);
    }

    #[tokio::test]
    async fn rejoin_clears_flag_and_streak() {
        let (store, sid) = seeded(&[2]).await;
        store.record_timeout(&sid, &pid(2), 1).await.unwrap();

        let outcome = store
            .join_member(Membership::new(sid, pid(2), Role::Standard, at(900)))
            .await
            .unwrap();
        let JoinOutcome::Rejoined(member) = outcome else {
            panic!("expected rejoin");
        };
        assert!(!member.inactive);
        assert_eq!(member.timeout_streak, 0);
        assert_eq!(member.joined_at, Some(at(10)));
    }

    #[tokio::test]
    async fn set_inactive_reports_only_real_flips() {
        let (store, sid) = seeded(&[]).await;
        assert!(store.set_member_inactive(&sid, &pid(1), true).await.unwrap());
        assert!(!store.set_member_inactive(&sid, &pid(1), true).await.unwrap());
        assert!(store.set_member_inactive(&sid, &pid(1), false).await.unwrap());
    }

    #[tokio::test]
    async fn closed_sessions_reject_transitions() {
        let (store, sid) = seeded(&[2]).await;
        let outcome = store
            .close_session(&sid, EventDraft::system("closed"), at(5))
            .await
            .unwrap();
        assert!(matches!(outcome, CloseOutcome::Closed(_)));
        assert_eq!(
            store.advance_turn(act(sid, 1, 6)).await.unwrap(),
            AdvanceOutcome::SessionClosed
        );
        assert!(store.open_sessions().await.unwrap().is_empty());
        assert!(store.stale_turns(at(u64::MAX)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_timeout_surfaces_as_store_error() {
        let store = MemoryStore::new(&StoreConfig { lock_timeout_ms: 10 });
        let _held = store.state.lock().await;
        let err = store.open_sessions().await.unwrap_err();
        assert_eq!(err, StoreError::LockTimeout { timeout_ms: 10 });
    }
}
