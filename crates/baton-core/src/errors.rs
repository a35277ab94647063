//! Unified error system for Baton
//!
//! One error type for every caller-facing operation. Each variant maps to a
//! stable machine-readable code so transport layers can surface it without
//! string matching.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unified error type for all Baton operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum BatonError {
    /// Caller is not a member, or attempted a privileged-only operation
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Error message describing the refused operation
        message: String,
    },

    /// Turn mismatch or closed session; resynchronize before retrying
    #[error("Conflict: {message}")]
    Conflict {
        /// Error message describing the conflicting state
        message: String,
    },

    /// Session or referenced resource absent
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// A rate-limit layer rejected the call
    #[error("Rate limited on {scope}: retry after {}s", ceil_secs(*.retry_after))]
    RateLimited {
        /// Remaining time in the rejecting window
        retry_after: Duration,
        /// Scope of the layer that rejected the call
        scope: String,
    },

    /// Malformed input or content-policy rejection
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Unexpected store failure
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl BatonError {
    /// Create a forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a rate limited error
    pub fn rate_limited(scope: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimited {
            retry_after,
            scope: scope.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "forbidden",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Invalid { .. } => "invalid",
            Self::Internal { .. } => "internal",
        }
    }

    /// Retry hint in whole seconds, rounded up, for rate-limited errors
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(ceil_secs(*retry_after)),
            _ => None,
        }
    }

    /// Whether the caller should resynchronize via the authoritative read
    pub fn requires_resync(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Round a duration up to whole seconds, never below one
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

/// Standard Result type for Baton operations
pub type Result<T> = std::result::Result<T, BatonError>;

/// Errors raised by store handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreError {
    /// The store's critical section could not be entered in time
    #[error("lock not acquired within {timeout_ms}ms")]
    LockTimeout {
        /// Configured statement timeout
        timeout_ms: u64,
    },

    /// A row with the same key already exists
    #[error("already exists: {what}")]
    AlreadyExists {
        /// The duplicated row
        what: String,
    },

    /// Persisted state violates a store invariant
    #[error("corrupt store state: {reason}")]
    Corrupt {
        /// What was found to be inconsistent
        reason: String,
    },

    /// Backend I/O or encoding failure
    #[error("store backend failure: {reason}")]
    Backend {
        /// Underlying failure description
        reason: String,
    },
}

impl From<StoreError> for BatonError {
    fn from(err: StoreError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend {
            reason: format!("serialization: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BatonError::forbidden("x").code(), "forbidden");
        assert_eq!(BatonError::conflict("x").code(), "conflict");
        assert_eq!(BatonError::not_found("x").code(), "not_found");
        assert_eq!(
            BatonError::rate_limited("turn", Duration::from_secs(3)).code(),
            "rate_limited"
        );
        assert_eq!(BatonError::invalid("x").code(), "invalid");
        assert_eq!(BatonError::internal("x").code(), "internal");
    }

    #[test]
    fn retry_after_rounds_up() {
        let err = BatonError::rate_limited("turn", Duration::from_millis(29_001));
        assert_eq!(err.retry_after_secs(), Some(30));

        let err = BatonError::rate_limited("turn", Duration::from_millis(10));
        assert_eq!(err.retry_after_secs(), Some(1));

        assert_eq!(BatonError::conflict("x").retry_after_secs(), None);
    }

    #[test]
    fn store_errors_surface_as_internal() {
        let err: BatonError = StoreError::LockTimeout { timeout_ms: 5 }.into();
        assert_eq!(err.code(), "internal");
        assert!(!err.requires_resync());
    }
}
