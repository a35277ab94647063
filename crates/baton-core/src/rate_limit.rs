//! Fixed-window rate limiting
//!
//! Counters are keyed by `scope:subject` and live in the store so every
//! worker process sees the same window. This module holds the pure window
//! arithmetic; the store applies it inside its critical section.
//!
//! # Usage
//!
//! ```rust
//! use baton_core::rate_limit::{apply_window, RateLimitKey, WindowPolicy};
//! use baton_core::time::PhysicalTime;
//! use std::time::Duration;
//!
//! let key = RateLimitKey::new("turn_burst", "participant-1");
//! let policy = WindowPolicy::new(1, Duration::from_secs(30));
//!
//! let (counter, first) = apply_window(None, &key, policy, PhysicalTime::from_millis(0));
//! assert!(first.is_allowed());
//!
//! let (_, second) = apply_window(Some(&counter), &key, policy, PhysicalTime::from_millis(1_000));
//! assert_eq!(second.retry_after(), Some(Duration::from_secs(29)));
//! ```

use crate::errors::BatonError;
use crate::time::PhysicalTime;
use crate::types::RateLimitCounter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Composite counter key `scope:subject`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Build a key from a scope and subject
    pub fn new(scope: &str, subject: impl fmt::Display) -> Self {
        Self(format!("{scope}:{subject}"))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scope part of the key
    pub fn scope(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Window size and allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    /// Maximum hits per window
    pub max: u32,
    /// Window length
    pub window: Duration,
}

impl WindowPolicy {
    /// Create a policy
    pub const fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Operation allowed
    Allowed {
        /// Hits left in the current window
        remaining: u32,
    },

    /// Operation denied - window exhausted
    Denied {
        /// Time until the window resets
        retry_after: Duration,

        /// Reason for denial
        reason: String,
    },
}

impl RateLimitResult {
    /// Check if operation is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Get retry-after duration if denied
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitResult::Denied { retry_after, .. } => Some(*retry_after),
            RateLimitResult::Allowed { .. } => None,
        }
    }

    /// Convert to a `BatonError::RateLimited` on denial
    pub fn into_result(self, scope: &str) -> Result<(), BatonError> {
        match self {
            RateLimitResult::Allowed { .. } => Ok(()),
            RateLimitResult::Denied { retry_after, .. } => {
                Err(BatonError::rate_limited(scope, retry_after))
            }
        }
    }
}

/// Apply one hit to `counter` under `policy` at `now`
///
/// Returns the counter to persist and the decision. A denied hit leaves the
/// counter unchanged.
pub fn apply_window(
    counter: Option<&RateLimitCounter>,
    key: &RateLimitKey,
    policy: WindowPolicy,
    now: PhysicalTime,
) -> (RateLimitCounter, RateLimitResult) {
    let fresh = || RateLimitCounter {
        key: key.as_str().to_string(),
        window_start: now,
        count: 1,
    };

    let Some(current) = counter else {
        return (fresh(), allowed(policy, 1));
    };

    let window_end = current.window_start.saturating_add(policy.window);
    if now >= window_end {
        return (fresh(), allowed(policy, 1));
    }

    if current.count < policy.max {
        let next = RateLimitCounter {
            count: current.count + 1,
            ..current.clone()
        };
        let decision = allowed(policy, next.count);
        return (next, decision);
    }

    let decision = RateLimitResult::Denied {
        retry_after: window_end.since(now),
        reason: format!("{} exceeded {} per {:?}", key, policy.max, policy.window),
    };
    (current.clone(), decision)
}

fn allowed(policy: WindowPolicy, count: u32) -> RateLimitResult {
    RateLimitResult::Allowed {
        remaining: policy.max.saturating_sub(count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> PhysicalTime {
        PhysicalTime::from_millis(secs * 1000)
    }

    #[test]
    fn second_hit_in_window_is_rejected_with_remaining_time() {
        let key = RateLimitKey::new("turn", "p1");
        let policy = WindowPolicy::new(1, Duration::from_secs(30));

        let (counter, first) = apply_window(None, &key, policy, at(100));
        assert!(first.is_allowed());
        assert_eq!(counter.count, 1);

        let (counter, second) = apply_window(Some(&counter), &key, policy, at(110));
        assert_eq!(second.retry_after(), Some(Duration::from_secs(20)));
        assert_eq!(counter.count, 1);
        assert_eq!(counter.window_start, at(100));
    }

    #[test]
    fn window_elapsing_starts_a_new_window() {
        let key = RateLimitKey::new("turn", "p1");
        let policy = WindowPolicy::new(1, Duration::from_secs(30));

        let (counter, _) = apply_window(None, &key, policy, at(100));
        let (counter, third) = apply_window(Some(&counter), &key, policy, at(130));
        assert!(third.is_allowed());
        assert_eq!(counter.window_start, at(130));
        assert_eq!(counter.count, 1);
    }

    #[test]
    fn counts_up_to_max() {
        let key = RateLimitKey::new("burst", "s1");
        let policy = WindowPolicy::new(3, Duration::from_secs(5));
        let mut counter = None;
        for expected_remaining in [2, 1, 0] {
            let (next, decision) = apply_window(counter.as_ref(), &key, policy, at(1));
            assert_eq!(
                decision,
                RateLimitResult::Allowed {
                    remaining: expected_remaining
                }
            );
            counter = Some(next);
        }
        let (_, denied) = apply_window(counter.as_ref(), &key, policy, at(2));
        assert!(!denied.is_allowed());
    }

    #[test]
    fn denial_converts_to_rate_limited_error() {
        let denied = RateLimitResult::Denied {
            retry_after: Duration::from_secs(4),
            reason: "x".into(),
        };
        let err = denied.into_result("turn_burst").unwrap_err();
        assert_eq!(err.code(), "rate_limited");
        assert_eq!(err.retry_after_secs(), Some(4));
    }

    #[test]
    fn key_exposes_scope() {
        let key = RateLimitKey::new("session_burst", "session-1");
        assert_eq!(key.scope(), "session_burst");
        assert_eq!(key.as_str(), "session_burst:session-1");
    }
}
