//! Session, membership, turn and event records
//!
//! These are the rows the store persists. Operations never mutate them in
//! place outside a store critical section.

use crate::identifiers::{EventId, ParticipantId, SessionId};
use crate::time::PhysicalTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting transitions
    Open,
    /// No further transitions; holder cleared
    Closed,
    /// Retained for history only
    Archived,
}

/// A shared turn-based session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,
    /// Lifecycle status
    pub status: SessionStatus,
    /// The single privileged participant
    pub privileged: ParticipantId,
    /// Creation time
    pub created_at: PhysicalTime,
}

impl Session {
    /// Whether the session accepts transitions
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}

/// Participant role within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Runs the session; always first in turn order
    Privileged,
    /// Regular participant
    Standard,
}

impl Role {
    /// Sort rank, lower first
    pub fn rank(self) -> u8 {
        match self {
            Role::Privileged => 0,
            Role::Standard => 1,
        }
    }
}

/// Membership of a participant in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Session the membership belongs to
    pub session_id: SessionId,
    /// Member identity
    pub participant_id: ParticipantId,
    /// Role within the session
    pub role: Role,
    /// When the participant joined; absent for imported rosters
    pub joined_at: Option<PhysicalTime>,
    /// Excluded from the active order while set
    pub inactive: bool,
    /// Consecutive watchdog timeouts without an explicit action
    pub timeout_streak: u32,
}

impl Membership {
    /// Fresh active membership
    pub fn new(
        session_id: SessionId,
        participant_id: ParticipantId,
        role: Role,
        joined_at: PhysicalTime,
    ) -> Self {
        Self {
            session_id,
            participant_id,
            role,
            joined_at: Some(joined_at),
            inactive: false,
            timeout_streak: 0,
        }
    }

    /// Whether this member holds the privileged role
    pub fn is_privileged(&self) -> bool {
        self.role == Role::Privileged
    }

    /// Cursor position of this membership in the join stream
    pub fn join_cursor(&self) -> JoinCursor {
        JoinCursor {
            joined_at: self.joined_at.unwrap_or_default(),
            participant_id: self.participant_id,
        }
    }
}

/// The single mutable "whose turn is it" record of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    /// Owning session
    pub session_id: SessionId,
    /// Current holder; `None` means it is the privileged participant's turn
    pub holder: Option<ParticipantId>,
    /// Completed turn count, never decreases
    pub turn_index: u64,
    /// Last transition time
    pub updated_at: PhysicalTime,
}

impl TurnState {
    /// Resolve the holder, mapping `None` onto the privileged participant
    pub fn effective_holder(&self, privileged: ParticipantId) -> ParticipantId {
        self.holder.unwrap_or(privileged)
    }

    /// Whether `participant` may act right now
    pub fn is_held_by(&self, participant: ParticipantId, privileged: ParticipantId) -> bool {
        self.effective_holder(privileged) == participant
    }
}

/// Kind of a logged event
///
/// Unrecognized kinds read from storage or the wire are kept verbatim in
/// `Unknown` so newer writers do not break older readers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// First event of every session
    Genesis,
    /// A participant's turn action
    Action,
    /// Narrative text from the privileged participant
    Narration,
    /// System-generated notice (forced skip, failover, membership)
    System,
    /// Kind written by a newer producer
    Unknown(String),
}

impl EventKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Genesis => "genesis",
            EventKind::Action => "action",
            EventKind::Narration => "narration",
            EventKind::System => "system",
            EventKind::Unknown(raw) => raw,
        }
    }

    /// Whether a participant may author this kind through a transition
    pub fn is_participant_authored(&self) -> bool {
        matches!(self, EventKind::Action | EventKind::Narration)
    }
}

impl From<String> for EventKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "genesis" => EventKind::Genesis,
            "action" => EventKind::Action,
            "narration" => EventKind::Narration,
            "system" => EventKind::System,
            _ => EventKind::Unknown(raw),
        }
    }
}

impl From<&str> for EventKind {
    fn from(raw: &str) -> Self {
        EventKind::from(raw.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order key of the event log
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EventCursor {
    /// Creation time
    pub created_at: PhysicalTime,
    /// Store-assigned sequence
    pub id: EventId,
}

/// Order key of the membership join stream
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct JoinCursor {
    /// Join time
    pub joined_at: PhysicalTime,
    /// Tie-break
    pub participant_id: ParticipantId,
}

/// Append-only log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned sequence
    pub id: EventId,
    /// Owning session
    pub session_id: SessionId,
    /// Author, `None` for system-generated entries
    pub author: Option<ParticipantId>,
    /// Kind tag
    pub kind: EventKind,
    /// Payload
    pub content: String,
    /// Creation time
    pub created_at: PhysicalTime,
}

impl Event {
    /// Position of this event in the log order
    pub fn cursor(&self) -> EventCursor {
        EventCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Event contents before the store assigns its order key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Author, `None` for system-generated entries
    pub author: Option<ParticipantId>,
    /// Kind tag
    pub kind: EventKind,
    /// Payload
    pub content: String,
}

impl EventDraft {
    /// Participant-authored draft
    pub fn authored(author: ParticipantId, kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            author: Some(author),
            kind,
            content: content.into(),
        }
    }

    /// System notice draft
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            author: None,
            kind: EventKind::System,
            content: content.into(),
        }
    }
}

/// Last-seen heartbeat of a participant in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Session
    pub session_id: SessionId,
    /// Participant
    pub participant_id: ParticipantId,
    /// Last heartbeat
    pub last_seen: PhysicalTime,
}

/// Accumulated turn-taking counters of a participant, global across sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliabilityRecord {
    /// Participant
    pub participant_id: ParticipantId,
    /// Turns handed to the participant
    pub turns_assigned: u64,
    /// Turns the participant completed with an action
    pub turns_taken: u64,
    /// Turns skipped by the watchdog
    pub watchdog_timeouts: u64,
    /// Last counter change
    pub updated_at: PhysicalTime,
}

impl ReliabilityRecord {
    /// Zeroed record
    pub fn empty(participant_id: ParticipantId, now: PhysicalTime) -> Self {
        Self {
            participant_id,
            turns_assigned: 0,
            turns_taken: 0,
            watchdog_timeouts: 0,
            updated_at: now,
        }
    }

    /// Apply a counter delta
    pub fn apply(&mut self, delta: ReliabilityDelta, now: PhysicalTime) {
        match delta {
            ReliabilityDelta::Assigned => self.turns_assigned += 1,
            ReliabilityDelta::Taken => self.turns_taken += 1,
            ReliabilityDelta::TimedOut => self.watchdog_timeouts += 1,
        }
        self.updated_at = now;
    }
}

/// Single counter increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityDelta {
    /// Turn handed to the participant
    Assigned,
    /// Participant completed a turn
    Taken,
    /// Watchdog skipped the participant
    TimedOut,
}

/// Fixed-window counter row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCounter {
    /// `scope:subject`
    pub key: String,
    /// Start of the current window
    pub window_start: PhysicalTime,
    /// Hits counted in the window
    pub count: u32,
}

/// Derived view recomputed outside the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    /// Session summary
    Summary,
    /// Character sheets
    Characters,
}
