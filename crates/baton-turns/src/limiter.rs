//! Layered rate limits for the transition protocol
//!
//! Four independent fixed windows, all of which must pass before a
//! transition reaches the store's conditional commit. Narrow layers run
//! first so a flooding participant is rejected before touching the shared
//! per-session counter.

use baton_core::effects::RateLimitStoreEffects;
use baton_core::rate_limit::RateLimitKey;
use baton_core::{ParticipantId, PhysicalTime, RateLimitConfig, Result, SessionId, WindowConfig};

/// Counter scopes, in evaluation order
pub const SCOPE_PARTICIPANT_BURST: &str = "turn_burst";
pub const SCOPE_PARTICIPANT_SUSTAINED: &str = "turn_sustained";
pub const SCOPE_PARTICIPANT_GLOBAL: &str = "turn_global";
pub const SCOPE_SESSION_BURST: &str = "session_burst";

/// Composite limiter over the configured layers
#[derive(Debug, Clone, Default)]
pub struct TransitionLimiter {
    config: RateLimitConfig,
}

impl TransitionLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    fn layers(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> [(RateLimitKey, WindowConfig); 4] {
        let pair = format!("{session_id}/{participant_id}");
        [
            (
                RateLimitKey::new(SCOPE_PARTICIPANT_BURST, &pair),
                self.config.participant_burst,
            ),
            (
                RateLimitKey::new(SCOPE_PARTICIPANT_SUSTAINED, &pair),
                self.config.participant_sustained,
            ),
            (
                RateLimitKey::new(SCOPE_PARTICIPANT_GLOBAL, participant_id),
                self.config.participant_global,
            ),
            (
                RateLimitKey::new(SCOPE_SESSION_BURST, session_id),
                self.config.session_burst,
            ),
        ]
    }

    /// Count one transition attempt against every layer
    ///
    /// Stops at the first rejecting layer and returns `RateLimited` with that
    /// layer's scope and remaining window. Layers checked before the
    /// rejection keep their hit.
    pub async fn check<E>(
        &self,
        effects: &E,
        session_id: &SessionId,
        participant_id: &ParticipantId,
        now: PhysicalTime,
    ) -> Result<()>
    where
        E: RateLimitStoreEffects + ?Sized,
    {
        for (key, layer) in self.layers(session_id, participant_id) {
            let decision = effects.hit_rate_limit(&key, layer.policy(), now).await?;
            if !decision.is_allowed() {
                tracing::debug!(
                    session_id = %session_id,
                    participant_id = %participant_id,
                    key = %key,
                    "transition rate limited"
                );
            }
            decision.into_result(key.scope())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::BatonError;
    use baton_effects::MemoryStore;
    use std::time::Duration;
    use uuid::Uuid;

    fn ids() -> (SessionId, ParticipantId) {
        (
            SessionId::from_uuid(Uuid::from_u128(1)),
            ParticipantId::from_uuid(Uuid::from_u128(2)),
        )
    }

    fn single_window(max: u32, window_ms: u64) -> RateLimitConfig {
        let generous = WindowConfig::new(1_000, 60_000);
        RateLimitConfig {
            participant_burst: WindowConfig::new(max, window_ms),
            participant_sustained: generous,
            participant_global: generous,
            session_burst: generous,
        }
    }

    #[tokio::test]
    async fn second_call_inside_window_reports_remaining_time() {
        let store = MemoryStore::default();
        let limiter = TransitionLimiter::new(single_window(1, 30_000));
        let (sid, pid) = ids();

        limiter
            .check(&store, &sid, &pid, PhysicalTime::from_millis(0))
            .await
            .unwrap();
        let err = limiter
            .check(&store, &sid, &pid, PhysicalTime::from_millis(10_000))
            .await
            .unwrap_err();
        match &err {
            BatonError::RateLimited { retry_after, scope } => {
                assert_eq!(*retry_after, Duration::from_secs(20));
                assert_eq!(scope, SCOPE_PARTICIPANT_BURST);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert_eq!(err.retry_after_secs(), Some(20));

        // Window elapsed: a new one starts.
        limiter
            .check(&store, &sid, &pid, PhysicalTime::from_millis(30_000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn session_layer_is_shared_between_participants() {
        let store = MemoryStore::default();
        let generous = WindowConfig::new(100, 60_000);
        let limiter = TransitionLimiter::new(RateLimitConfig {
            participant_burst: generous,
            participant_sustained: generous,
            participant_global: generous,
            session_burst: WindowConfig::new(2, 5_000),
        });
        let (sid, _) = ids();
        let now = PhysicalTime::from_millis(1);

        for n in 10..12 {
            let pid = ParticipantId::from_uuid(Uuid::from_u128(n));
            limiter.check(&store, &sid, &pid, now).await.unwrap();
        }
        let third = ParticipantId::from_uuid(Uuid::from_u128(12));
        let err = limiter.check(&store, &sid, &third, now).await.unwrap_err();
        assert_eq!(err.code(), "rate_limited");
    }

    #[tokio::test]
    async fn global_layer_spans_sessions() {
        let store = MemoryStore::default();
        let generous = WindowConfig::new(100, 60_000);
        let limiter = TransitionLimiter::new(RateLimitConfig {
            participant_burst: generous,
            participant_sustained: generous,
            participant_global: WindowConfig::new(1, 60_000),
            session_burst: generous,
        });
        let (_, pid) = ids();
        let now = PhysicalTime::from_millis(1);

        let first = SessionId::from_uuid(Uuid::from_u128(100));
        let second = SessionId::from_uuid(Uuid::from_u128(101));
        limiter.check(&store, &first, &pid, now).await.unwrap();
        let err = limiter.check(&store, &second, &pid, now).await.unwrap_err();
        assert!(matches!(err, BatonError::RateLimited { ref scope, .. } if scope == SCOPE_PARTICIPANT_GLOBAL));
    }
}
