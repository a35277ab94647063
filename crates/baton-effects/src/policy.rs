//! Content policy handlers

use async_trait::async_trait;
use baton_core::effects::{ContentPolicyEffects, PolicyViolation};
use baton_core::{EventKind, SessionId};

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

#[async_trait]
impl ContentPolicyEffects for AllowAllPolicy {
    async fn check_content(
        &self,
        _session_id: &SessionId,
        _kind: &EventKind,
        _content: &str,
    ) -> Result<(), PolicyViolation> {
        Ok(())
    }
}

/// Rejects blank or oversized content
#[derive(Debug, Clone, Copy)]
pub struct LengthLimitPolicy {
    max_chars: usize,
}

impl LengthLimitPolicy {
    /// Limit content to `max_chars` characters
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for LengthLimitPolicy {
    fn default() -> Self {
        Self::new(4_000)
    }
}

#[async_trait]
impl ContentPolicyEffects for LengthLimitPolicy {
    async fn check_content(
        &self,
        _session_id: &SessionId,
        kind: &EventKind,
        content: &str,
    ) -> Result<(), PolicyViolation> {
        if content.trim().is_empty() {
            return Err(PolicyViolation {
                reason: format!("{kind} content is blank"),
            });
        }
        let chars = content.chars().count();
        if chars > self.max_chars {
            return Err(PolicyViolation {
                reason: format!("{kind} content has {chars} characters, limit {}", self.max_chars),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn length_limit_counts_characters() {
        let policy = LengthLimitPolicy::new(3);
        let sid = SessionId::default();
        assert!(policy.check_content(&sid, &EventKind::Action, "äöü").await.is_ok());
        assert!(policy.check_content(&sid, &EventKind::Action, "abcd").await.is_err());
        assert!(policy.check_content(&sid, &EventKind::Action, "  ").await.is_err());
        assert!(AllowAllPolicy.check_content(&sid, &EventKind::Action, "").await.is_ok());
    }
}
