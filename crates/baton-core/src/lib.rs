//! Baton Core - turn-scheduling foundation
//!
//! This crate holds the pure parts of Baton: the records the store keeps,
//! the algorithms that must agree across every worker process, and the
//! effect interfaces the turn services are written against.
//!
//! # Layers
//!
//! ## Records
//! - `Session`, `Membership`, `TurnState`, `Event`, `PresenceRecord`,
//!   `ReliabilityRecord`, `RateLimitCounter`
//!
//! ## Pure algorithms
//! - `order`: deterministic turn order and next-holder selection
//! - `rate_limit`: fixed-window counter arithmetic
//! - `reliability`: health score from turn counters
//!
//! ## Effect interfaces
//! - Store effects (one critical section per call), `PhysicalTimeEffects`,
//!   `ContentPolicyEffects`

#![allow(missing_docs)]
#![forbid(unsafe_code)]

/// Configuration types and loading
pub mod config;

/// Pure effect interfaces (no implementations)
pub mod effects;

/// Unified error handling
pub mod errors;

/// Session, participant and event identifiers
pub mod identifiers;

/// Turn order resolution
pub mod order;

/// Fixed-window rate limiting
pub mod rate_limit;

/// Reliability scoring
pub mod reliability;

/// Physical time values
pub mod time;

/// Stored records
pub mod types;

// === Public API Re-exports ===

pub use config::{
    BatonConfig, ConfigValidation, ContinuityConfig, FeedConfig, RateLimitConfig, StoreConfig,
    WatchdogConfig, WindowConfig,
};
pub use errors::{BatonError, Result, StoreError};
pub use identifiers::{EventId, ParticipantId, SessionId};
pub use order::{holder_slot, next_holder, resolve_member_order, resolve_order, OrderCandidate};
pub use rate_limit::{apply_window, RateLimitKey, RateLimitResult, WindowPolicy};
pub use reliability::{reliability_score, score_record};
pub use time::PhysicalTime;
pub use types::{
    DerivedKind, Event, EventCursor, EventDraft, EventKind, JoinCursor, Membership,
    PresenceRecord, RateLimitCounter, ReliabilityDelta, ReliabilityRecord, Role, Session,
    SessionStatus, TurnState,
};

/// Standard result type alias kept for call sites that import it by name
pub type BatonResult<T> = std::result::Result<T, BatonError>;
