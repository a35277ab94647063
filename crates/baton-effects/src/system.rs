//! Composite effect system
//!
//! Bundles a store, a clock and a content policy into one value that
//! satisfies `TurnEffects`, so services take a single `&E` per call.
//! Individual store operations can be made to fail on demand, which is how
//! tests exercise the best-effort paths.

use crate::policy::AllowAllPolicy;
use crate::storage::MemoryStore;
use crate::time::{RealTimeHandler, SimulatedTimeHandler};
use async_trait::async_trait;
use baton_core::effects::{
    AdvanceOutcome, AdvanceRequest, CloseOutcome, ContentPolicyEffects, DerivedStateEffects,
    EventLogEffects, JoinOutcome, LeaveOutcome, MembershipEffects, PhysicalTimeEffects,
    PolicyViolation, PresenceEffects, RateLimitStoreEffects, ReliabilityLedgerEffects,
    SessionStoreEffects, StoreResult, TimeError, TimeoutOutcome, TurnStateEffects,
};
use baton_core::rate_limit::{RateLimitKey, RateLimitResult, WindowPolicy};
use baton_core::{
    DerivedKind, Event, EventCursor, EventDraft, EventKind, Membership, ParticipantId,
    PhysicalTime, ReliabilityDelta, ReliabilityRecord, Session, SessionId, StoreConfig,
    StoreError, TurnState,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Store, clock and policy behind one handle
///
/// Clones share all three.
#[derive(Clone)]
pub struct BatonEffectSystem<C = RealTimeHandler> {
    store: MemoryStore,
    clock: C,
    policy: Arc<dyn ContentPolicyEffects>,
    injected_faults: Arc<Mutex<HashSet<&'static str>>>,
}

impl BatonEffectSystem<RealTimeHandler> {
    /// Production composition: in-memory store, system clock, no policy
    pub fn production(config: &StoreConfig) -> Self {
        Self::new(MemoryStore::new(config), RealTimeHandler::new())
    }
}

impl BatonEffectSystem<SimulatedTimeHandler> {
    /// Test composition with a manual clock starting at `start_ms`
    pub fn simulated(start_ms: u64) -> Self {
        Self::new(MemoryStore::default(), SimulatedTimeHandler::new(start_ms))
    }
}

impl<C> BatonEffectSystem<C> {
    /// Compose from a store and a clock
    pub fn new(store: MemoryStore, clock: C) -> Self {
        Self {
            store,
            clock,
            policy: Arc::new(AllowAllPolicy),
            injected_faults: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Replace the content policy
    pub fn with_policy(mut self, policy: impl ContentPolicyEffects + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Underlying store
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Underlying clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Make every call to the named store operation fail
    pub fn inject_fault(&self, operation: &'static str) {
        self.injected_faults.lock().insert(operation);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.injected_faults.lock().clear();
    }

    fn check_fault(&self, operation: &'static str) -> StoreResult<()> {
        if self.injected_faults.lock().contains(operation) {
            return Err(StoreError::Backend {
                reason: format!("injected failure in {operation}"),
            });
        }
        Ok(())
    }
}

impl<C> std::fmt::Debug for BatonEffectSystem<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatonEffectSystem")
            .field("store", &self.store)
            .field("faults", &self.injected_faults.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: Send + Sync> SessionStoreEffects for BatonEffectSystem<C> {
    async fn insert_session(
        &self,
        session: Session,
        members: Vec<Membership>,
        genesis: EventDraft,
    ) -> StoreResult<(TurnState, Event)> {
        self.check_fault("insert_session")?;
        self.store.insert_session(session, members, genesis).await
    }

    async fn session(&self, session_id: &SessionId) -> StoreResult<Option<Session>> {
        self.check_fault("session")?;
        self.store.session(session_id).await
    }

    async fn close_session(
        &self,
        session_id: &SessionId,
        notice: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<CloseOutcome> {
        self.check_fault("close_session")?;
        self.store.close_session(session_id, notice, now).await
    }

    async fn open_sessions(&self) -> StoreResult<Vec<Session>> {
        self.check_fault("open_sessions")?;
        self.store.open_sessions().await
    }
}

#[async_trait]
impl<C: Send + Sync> MembershipEffects for BatonEffectSystem<C> {
    async fn members(&self, session_id: &SessionId) -> StoreResult<Vec<Membership>> {
        self.check_fault("members")?;
        self.store.members(session_id).await
    }

    async fn join_member(&self, membership: Membership) -> StoreResult<JoinOutcome> {
        self.check_fault("join_member")?;
        self.store.join_member(membership).await
    }

    async fn leave_member(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        notice: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<LeaveOutcome> {
        self.check_fault("leave_member")?;
        self.store
            .leave_member(session_id, participant_id, notice, now)
            .await
    }

    async fn set_member_inactive(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        inactive: bool,
    ) -> StoreResult<bool> {
        self.check_fault("set_member_inactive")?;
        self.store
            .set_member_inactive(session_id, participant_id, inactive)
            .await
    }

    async fn record_timeout(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        escalate_at: u32,
    ) -> StoreResult<TimeoutOutcome> {
        self.check_fault("record_timeout")?;
        self.store
            .record_timeout(session_id, participant_id, escalate_at)
            .await
    }
}

#[async_trait]
impl<C: Send + Sync> TurnStateEffects for BatonEffectSystem<C> {
    async fn turn_state(&self, session_id: &SessionId) -> StoreResult<Option<TurnState>> {
        self.check_fault("turn_state")?;
        self.store.turn_state(session_id).await
    }

    async fn advance_turn(&self, request: AdvanceRequest) -> StoreResult<AdvanceOutcome> {
        self.check_fault("advance_turn")?;
        self.store.advance_turn(request).await
    }

    async fn stale_turns(&self, stale_before: PhysicalTime) -> StoreResult<Vec<TurnState>> {
        self.check_fault("stale_turns")?;
        self.store.stale_turns(stale_before).await
    }
}

#[async_trait]
impl<C: Send + Sync> EventLogEffects for BatonEffectSystem<C> {
    async fn append_event(
        &self,
        session_id: &SessionId,
        draft: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<Event> {
        self.check_fault("append_event")?;
        self.store.append_event(session_id, draft, now).await
    }

    async fn events_after(
        &self,
        session_id: &SessionId,
        after: Option<EventCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Event>> {
        self.check_fault("events_after")?;
        self.store.events_after(session_id, after, limit).await
    }

    async fn latest_events(&self, session_id: &SessionId, limit: usize) -> StoreResult<Vec<Event>> {
        self.check_fault("latest_events")?;
        self.store.latest_events(session_id, limit).await
    }
}

#[async_trait]
impl<C: Send + Sync> PresenceEffects for BatonEffectSystem<C> {
    async fn touch_presence(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        now: PhysicalTime,
    ) -> StoreResult<()> {
        self.check_fault("touch_presence")?;
        self.store
            .touch_presence(session_id, participant_id, now)
            .await
    }

    async fn last_seen(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> StoreResult<Option<PhysicalTime>> {
        self.check_fault("last_seen")?;
        self.store.last_seen(session_id, participant_id).await
    }
}

#[async_trait]
impl<C: Send + Sync> ReliabilityLedgerEffects for BatonEffectSystem<C> {
    async fn bump_reliability(
        &self,
        participant_id: &ParticipantId,
        delta: ReliabilityDelta,
        now: PhysicalTime,
    ) -> StoreResult<ReliabilityRecord> {
        self.check_fault("bump_reliability")?;
        self.store.bump_reliability(participant_id, delta, now).await
    }

    async fn reliability(
        &self,
        participant_id: &ParticipantId,
    ) -> StoreResult<Option<ReliabilityRecord>> {
        self.check_fault("reliability")?;
        self.store.reliability(participant_id).await
    }
}

#[async_trait]
impl<C: Send + Sync> RateLimitStoreEffects for BatonEffectSystem<C> {
    async fn hit_rate_limit(
        &self,
        key: &RateLimitKey,
        policy: WindowPolicy,
        now: PhysicalTime,
    ) -> StoreResult<RateLimitResult> {
        self.check_fault("hit_rate_limit")?;
        self.store.hit_rate_limit(key, policy, now).await
    }
}

#[async_trait]
impl<C: Send + Sync> DerivedStateEffects for BatonEffectSystem<C> {
    async fn mark_derived_updated(
        &self,
        session_id: &SessionId,
        kind: DerivedKind,
        now: PhysicalTime,
    ) -> StoreResult<()> {
        self.check_fault("mark_derived_updated")?;
        self.store.mark_derived_updated(session_id, kind, now).await
    }

    async fn derived_updated_at(
        &self,
        session_id: &SessionId,
        kind: DerivedKind,
    ) -> StoreResult<Option<PhysicalTime>> {
        self.check_fault("derived_updated_at")?;
        self.store.derived_updated_at(session_id, kind).await
    }
}

#[async_trait]
impl<C: PhysicalTimeEffects> PhysicalTimeEffects for BatonEffectSystem<C> {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        self.clock.physical_time().await
    }
}

#[async_trait]
impl<C: Send + Sync> ContentPolicyEffects for BatonEffectSystem<C> {
    async fn check_content(
        &self,
        session_id: &SessionId,
        kind: &EventKind,
        content: &str,
    ) -> Result<(), PolicyViolation> {
        self.policy.check_content(session_id, kind, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::LengthLimitPolicy;
    use baton_core::effects::TurnEffects;

    fn assert_turn_effects<E: TurnEffects>(_: &E) {}

    #[tokio::test]
    async fn composite_satisfies_turn_effects() {
        let effects = BatonEffectSystem::simulated(5_000);
        assert_turn_effects(&effects);
        assert_eq!(
            effects.physical_time().await.unwrap(),
            PhysicalTime::from_millis(5_000)
        );
        effects.clock().advance_time(10);
        assert_eq!(effects.physical_time().await.unwrap().ts_ms, 5_010);
    }

    #[tokio::test]
    async fn injected_faults_fail_only_the_named_operation() {
        let effects = BatonEffectSystem::simulated(0);
        effects.inject_fault("open_sessions");
        assert!(effects.open_sessions().await.is_err());
        assert!(effects.session(&SessionId::default()).await.is_ok());

        effects.clear_faults();
        assert!(effects.open_sessions().await.is_ok());
    }

    #[tokio::test]
    async fn policy_can_be_swapped() {
        let effects = BatonEffectSystem::simulated(0).with_policy(LengthLimitPolicy::new(2));
        let sid = SessionId::default();
        assert!(effects
            .check_content(&sid, &EventKind::Action, "long")
            .await
            .is_err());
    }
}
