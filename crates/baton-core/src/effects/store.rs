//! Store effect interfaces
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `baton-effects` (`MemoryStore`), or any
//!   transactional datastore
//! - **Usage**: `baton-turns` services
//!
//! The store is the only arbiter of truth across worker processes. Every
//! method is one critical section: implementations must never let another
//! writer observe a partial effect, and must never hold the section across an
//! external call. `advance_turn` is the conditional commit that replaces
//! "read holder, compare, write" and must not be split into round trips.

use crate::errors::StoreError;
use crate::identifiers::{ParticipantId, SessionId};
use crate::rate_limit::{RateLimitKey, RateLimitResult, WindowPolicy};
use crate::time::PhysicalTime;
use crate::types::{
    DerivedKind, Event, EventCursor, EventDraft, Membership, ReliabilityDelta, ReliabilityRecord,
    Session, TurnState,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Precondition checked inside the conditional commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvanceGuard {
    /// The actor must be the current holder (or the privileged participant
    /// while the holder is null)
    Actor(ParticipantId),
    /// The holder must be unchanged and `updated_at` still strictly older
    /// than `stale_before`
    Stale {
        /// Holder observed by the scan
        holder: Option<ParticipantId>,
        /// Staleness cut-off evaluated at commit time
        stale_before: PhysicalTime,
    },
}

/// Append-and-advance request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceRequest {
    /// Target session
    pub session_id: SessionId,
    /// Commit precondition
    pub guard: AdvanceGuard,
    /// Event appended in the same commit
    pub event: EventDraft,
    /// Commit time
    pub now: PhysicalTime,
}

/// Effects of an accepted transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCommit {
    /// The appended event
    pub event: Event,
    /// Turn state before the commit
    pub previous: TurnState,
    /// Turn state after the commit
    pub turn: TurnState,
    /// Participant now holding the turn (privileged resolved)
    pub next_holder: ParticipantId,
    /// Participant whose turn ended (privileged resolved)
    pub previous_holder: ParticipantId,
}

/// Outcome of the conditional commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvanceOutcome {
    /// Guard held; event appended and turn advanced
    Committed(TurnCommit),
    /// Guard failed against the current turn state
    TurnMismatch {
        /// Turn state at commit time
        current: TurnState,
    },
    /// The actor is not a member of the session
    NotMember,
    /// Session no longer accepts transitions
    SessionClosed,
    /// Session does not exist
    SessionNotFound,
}

/// Outcome of closing a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseOutcome {
    /// Status set to closed, holder cleared, notice appended
    Closed(Event),
    /// Already closed or archived
    AlreadyClosed,
    /// Session does not exist
    SessionNotFound,
}

/// Outcome of a join or rejoin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOutcome {
    /// New membership inserted
    Joined(Membership),
    /// Existing membership reactivated with its streak cleared
    Rejoined(Membership),
    /// Session does not accept members
    SessionClosed,
    /// Session does not exist
    SessionNotFound,
}

/// Outcome of a leave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveOutcome {
    /// Membership removed; `advanced` is set when the leaver held the turn
    Left {
        /// Turn state after the hand-off, if one happened
        advanced: Option<TurnState>,
        /// Departure notice
        notice: Event,
    },
    /// Participant is not a member
    NotMember,
    /// Session does not exist
    SessionNotFound,
}

/// Outcome of recording a watchdog timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOutcome {
    /// Consecutive timeouts after this one
    pub streak: u32,
    /// Whether this timeout flipped the member to inactive
    pub escalated: bool,
}

/// Session rows
#[async_trait]
pub trait SessionStoreEffects: Send + Sync {
    /// Insert a session, its initial members, its turn state (index 0,
    /// privileged holder) and the genesis event
    async fn insert_session(
        &self,
        session: Session,
        members: Vec<Membership>,
        genesis: EventDraft,
    ) -> StoreResult<(TurnState, Event)>;

    /// Fetch a session
    async fn session(&self, session_id: &SessionId) -> StoreResult<Option<Session>>;

    /// Close a session: status closed, holder null, notice appended
    async fn close_session(
        &self,
        session_id: &SessionId,
        notice: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<CloseOutcome>;

    /// All sessions currently open
    async fn open_sessions(&self) -> StoreResult<Vec<Session>>;
}

/// Membership rows
#[async_trait]
pub trait MembershipEffects: Send + Sync {
    /// Members of a session, in storage order
    async fn members(&self, session_id: &SessionId) -> StoreResult<Vec<Membership>>;

    /// Insert a member, or reactivate an existing one and clear its streak
    async fn join_member(&self, membership: Membership) -> StoreResult<JoinOutcome>;

    /// Remove a member, handing the turn on first if they hold it
    async fn leave_member(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        notice: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<LeaveOutcome>;

    /// Set the inactive flag; returns whether the flag actually flipped
    async fn set_member_inactive(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        inactive: bool,
    ) -> StoreResult<bool>;

    /// Increment the timeout streak, marking a standard member inactive once
    /// the streak reaches `escalate_at`
    async fn record_timeout(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        escalate_at: u32,
    ) -> StoreResult<TimeoutOutcome>;
}

/// Turn state rows
#[async_trait]
pub trait TurnStateEffects: Send + Sync {
    /// Current turn state
    async fn turn_state(&self, session_id: &SessionId) -> StoreResult<Option<TurnState>>;

    /// Conditional append-and-advance
    ///
    /// Checks the guard, appends the event, recomputes the next holder from
    /// the live active membership, and writes holder plus incremented index,
    /// all in one critical section.
    async fn advance_turn(&self, request: AdvanceRequest) -> StoreResult<AdvanceOutcome>;

    /// Turn states of open sessions last updated strictly before
    /// `stale_before`
    async fn stale_turns(&self, stale_before: PhysicalTime) -> StoreResult<Vec<TurnState>>;
}

/// Event log
#[async_trait]
pub trait EventLogEffects: Send + Sync {
    /// Append an event outside a transition (system notices)
    async fn append_event(
        &self,
        session_id: &SessionId,
        draft: EventDraft,
        now: PhysicalTime,
    ) -> StoreResult<Event>;

    /// Events strictly after `after` in log order, at most `limit`
    async fn events_after(
        &self,
        session_id: &SessionId,
        after: Option<EventCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Event>>;

    /// The last `limit` events, oldest first
    async fn latest_events(&self, session_id: &SessionId, limit: usize) -> StoreResult<Vec<Event>>;
}

/// Presence heartbeats
#[async_trait]
pub trait PresenceEffects: Send + Sync {
    /// Record a heartbeat
    async fn touch_presence(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        now: PhysicalTime,
    ) -> StoreResult<()>;

    /// Last heartbeat, if any
    async fn last_seen(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> StoreResult<Option<PhysicalTime>>;
}

/// Reliability counters
#[async_trait]
pub trait ReliabilityLedgerEffects: Send + Sync {
    /// Apply one counter increment, creating the record if needed
    async fn bump_reliability(
        &self,
        participant_id: &ParticipantId,
        delta: ReliabilityDelta,
        now: PhysicalTime,
    ) -> StoreResult<ReliabilityRecord>;

    /// Current counters
    async fn reliability(
        &self,
        participant_id: &ParticipantId,
    ) -> StoreResult<Option<ReliabilityRecord>>;
}

/// Fixed-window counters
#[async_trait]
pub trait RateLimitStoreEffects: Send + Sync {
    /// Atomically apply one hit to the counter at `key`
    async fn hit_rate_limit(
        &self,
        key: &RateLimitKey,
        policy: WindowPolicy,
        now: PhysicalTime,
    ) -> StoreResult<RateLimitResult>;
}

/// Derived-view freshness, maintained by recomputation collaborators
#[async_trait]
pub trait DerivedStateEffects: Send + Sync {
    /// Record that a derived view was recomputed
    async fn mark_derived_updated(
        &self,
        session_id: &SessionId,
        kind: DerivedKind,
        now: PhysicalTime,
    ) -> StoreResult<()>;

    /// Last recomputation time of a derived view
    async fn derived_updated_at(
        &self,
        session_id: &SessionId,
        kind: DerivedKind,
    ) -> StoreResult<Option<PhysicalTime>>;
}
