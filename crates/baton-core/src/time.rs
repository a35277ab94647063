//! Physical time values
//!
//! Every timestamp in Baton is wall-clock milliseconds since the Unix epoch,
//! obtained through `PhysicalTimeEffects` so simulations can drive the clock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Wall-clock timestamp in milliseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PhysicalTime {
    /// Milliseconds since the Unix epoch
    pub ts_ms: u64,
}

impl PhysicalTime {
    /// Create from milliseconds
    pub const fn from_millis(ts_ms: u64) -> Self {
        Self { ts_ms }
    }

    /// Timestamp shifted back by `duration`, saturating at the epoch
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self {
            ts_ms: self.ts_ms.saturating_sub(duration_ms(duration)),
        }
    }

    /// Timestamp shifted forward by `duration`
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self {
            ts_ms: self.ts_ms.saturating_add(duration_ms(duration)),
        }
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later
    pub fn since(self, earlier: PhysicalTime) -> Duration {
        Duration::from_millis(self.ts_ms.saturating_sub(earlier.ts_ms))
    }

    /// Whether `self` is strictly older than `threshold` as seen from `now`
    ///
    /// Exactly `threshold` old is not stale.
    pub fn is_stale(self, now: PhysicalTime, threshold: Duration) -> bool {
        self < now.saturating_sub(threshold)
    }
}

impl fmt::Display for PhysicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.ts_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
