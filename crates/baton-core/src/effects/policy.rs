//! Content policy seam
//!
//! Moderation lives outside Baton. The transition protocol asks this effect
//! before it commits and rejects the action with `Invalid` on a violation.

use crate::identifiers::SessionId;
use crate::types::EventKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Policy rejection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("content rejected: {reason}")]
pub struct PolicyViolation {
    /// Why the content was rejected
    pub reason: String,
}

/// Pre-commit content check
#[async_trait]
pub trait ContentPolicyEffects: Send + Sync {
    /// Accept or reject an action's content
    async fn check_content(
        &self,
        session_id: &SessionId,
        kind: &EventKind,
        content: &str,
    ) -> Result<(), PolicyViolation>;
}
