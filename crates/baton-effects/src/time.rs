//! Layer 3: Time Effect Handlers
//!
//! `RealTimeHandler` reads the system clock. `SimulatedTimeHandler` keeps a
//! shared manual clock so the watchdog and continuity thresholds can be
//! crossed in tests without waiting.

use async_trait::async_trait;
use baton_core::effects::{PhysicalTimeEffects, TimeError};
use baton_core::PhysicalTime;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Real time handler for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for RealTimeHandler {
    #[allow(clippy::disallowed_methods)]
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TimeError::ClockUnavailable {
                reason: e.to_string(),
            })?;
        let ts_ms = u64::try_from(elapsed.as_millis()).map_err(|e| TimeError::OperationFailed {
            reason: e.to_string(),
        })?;
        Ok(PhysicalTime::from_millis(ts_ms))
    }
}

/// Manually driven clock
///
/// Clones share the same clock. Nothing moves it except the explicit
/// `advance*` and `set_time` calls.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTimeHandler {
    current_ms: Arc<AtomicU64>,
}

impl SimulatedTimeHandler {
    /// Create a clock starting at `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance the clock
    pub fn advance_time(&self, duration_ms: u64) {
        self.current_ms.fetch_add(duration_ms, Ordering::SeqCst);
    }

    /// Advance the clock by a `Duration`
    pub fn advance(&self, duration: Duration) {
        self.advance_time(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    }

    /// Set the absolute time
    pub fn set_time(&self, time_ms: u64) {
        self.current_ms.store(time_ms, Ordering::SeqCst);
    }

    /// Current time
    pub fn now(&self) -> PhysicalTime {
        PhysicalTime::from_millis(self.current_ms.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl PhysicalTimeEffects for SimulatedTimeHandler {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        Ok(self.now())
    }
}
