//! Baton Turns - turn scheduling and liveness services
//!
//! Layer 5 services written against the `baton-core` effect interfaces:
//!
//! - `TurnHandler`: the append-and-advance transition protocol, session
//!   lifecycle and the authoritative full-state read
//! - `TransitionLimiter`: layered fixed-window limits in front of every
//!   transition
//! - `TurnWatchdog`: forced skips of stalled turns with escalation
//! - `ContinuityManager`: presence-driven failover for the privileged role
//! - `SessionFeedHub`: one cancellable polling task per observer pushing
//!   typed change hints
//! - `ReconnectBackoff`: client-side reconnect schedule for the feed
//!
//! Every service takes `&E` per call and holds no shared mutable state of its
//! own, so any number of worker processes can run them against one store.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod backoff;
pub mod continuity;
pub mod feed;
pub mod gauge;
pub mod handler;
pub mod limiter;
pub mod watchdog;

pub use backoff::ReconnectBackoff;
pub use continuity::{ContinuityChange, ContinuityManager};
pub use feed::{FeedFrame, FeedMessage, FeedSubscription, SessionFeedHub};
pub use gauge::{ConnectionGauge, ConnectionGuard};
pub use handler::{ActionAccepted, SessionSnapshot, TurnHandler};
pub use limiter::TransitionLimiter;
pub use watchdog::{SweepReport, TurnWatchdog, WatchdogSkip};

use baton_core::effects::{PhysicalTimeEffects, RateLimitStoreEffects, TimeError};
use baton_core::rate_limit::{RateLimitKey, WindowPolicy};
use baton_core::{BatonError, PhysicalTime, Result, SessionId};
use std::time::Duration;

pub(crate) fn map_time_err(err: TimeError) -> BatonError {
    BatonError::internal(format!("time error: {err}"))
}

pub(crate) async fn current_time<E>(effects: &E) -> Result<PhysicalTime>
where
    E: PhysicalTimeEffects + ?Sized,
{
    effects.physical_time().await.map_err(map_time_err)
}

/// Claim the per-session sweep slot for `scope`
///
/// The slot is a max-1 fixed-window counter in the store, so at most one
/// worker process sweeps a session per `min_interval`.
pub(crate) async fn claim_sweep_slot<E>(
    effects: &E,
    scope: &str,
    session_id: &SessionId,
    min_interval: Duration,
    now: PhysicalTime,
) -> Result<bool>
where
    E: RateLimitStoreEffects + ?Sized,
{
    let key = RateLimitKey::new(scope, session_id);
    let decision = effects
        .hit_rate_limit(&key, WindowPolicy::new(1, min_interval), now)
        .await?;
    Ok(decision.is_allowed())
}
