//! Effect interfaces (pure signatures, no implementations)
//!
//! Services in `baton-turns` take an effect reference per call and never
//! touch storage, clocks or policy directly. Handlers live in
//! `baton-effects`.

pub mod policy;
pub mod store;
pub mod time;

pub use policy::{ContentPolicyEffects, PolicyViolation};
pub use store::{
    AdvanceGuard, AdvanceOutcome, AdvanceRequest, CloseOutcome, DerivedStateEffects,
    EventLogEffects, JoinOutcome, LeaveOutcome, MembershipEffects, PresenceEffects,
    RateLimitStoreEffects, ReliabilityLedgerEffects, SessionStoreEffects, StoreResult,
    TimeoutOutcome, TurnCommit, TurnStateEffects,
};
pub use time::{PhysicalTimeEffects, TimeError};

/// Supertrait for the full store surface
///
/// Combines every store effect the turn services read or write.
pub trait TurnStoreEffects:
    SessionStoreEffects
    + MembershipEffects
    + TurnStateEffects
    + EventLogEffects
    + PresenceEffects
    + ReliabilityLedgerEffects
    + RateLimitStoreEffects
    + DerivedStateEffects
{
}

/// Automatic implementation for types that satisfy the required bounds
impl<T> TurnStoreEffects for T where
    T: SessionStoreEffects
        + MembershipEffects
        + TurnStateEffects
        + EventLogEffects
        + PresenceEffects
        + ReliabilityLedgerEffects
        + RateLimitStoreEffects
        + DerivedStateEffects
{
}

/// Supertrait for turn services
///
/// Store, clock and content policy: everything `TurnHandler`, the watchdog,
/// the continuity manager and the feed need.
pub trait TurnEffects: TurnStoreEffects + PhysicalTimeEffects + ContentPolicyEffects {}

/// Automatic implementation for types that satisfy the required bounds
impl<T> TurnEffects for T where T: TurnStoreEffects + PhysicalTimeEffects + ContentPolicyEffects {}
