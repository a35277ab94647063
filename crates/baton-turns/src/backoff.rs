//! Client reconnect schedule for the change feed
//!
//! Reconnecting is the client's job; the server never retries on its behalf.
//! Delays grow exponentially with up to 10% jitter, are capped, and the
//! attempt counter resets once a connection has stayed up for the stability
//! window.

use rand::Rng;
use std::time::{Duration, Instant};

/// Jitter as a fraction of the base delay
const JITTER_FRACTION: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    stability_window: Duration,
    attempt: u32,
    connected_at: Option<Instant>,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(500),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }
}

impl ReconnectBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, stability_window: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            stability_window,
            attempt: 0,
            connected_at: None,
        }
    }

    /// Failed attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next reconnect attempt
    pub fn next_delay(&mut self) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(self.attempt));
        let jitter_ms =
            (base.as_millis() as f64 * JITTER_FRACTION * rand::thread_rng().gen::<f64>()) as u64;
        self.attempt = self.attempt.saturating_add(1);
        base.saturating_add(Duration::from_millis(jitter_ms))
            .min(self.max_delay)
    }

    /// The channel opened at `at`
    pub fn connected(&mut self, at: Instant) {
        self.connected_at = Some(at);
    }

    /// The channel dropped at `at`
    ///
    /// A connection that lasted the stability window resets the schedule.
    pub fn disconnected(&mut self, at: Instant) {
        if let Some(since) = self.connected_at.take() {
            if at.saturating_duration_since(since) >= self.stability_window {
                self.attempt = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_within_jitter_and_cap() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            Duration::from_secs(10),
        );
        for expected_base in [100u64, 200, 400, 800] {
            let delay = backoff.next_delay().as_millis() as u64;
            assert!(delay >= expected_base, "{delay} < {expected_base}");
            assert!(delay <= (expected_base + expected_base / 10).min(1_000));
        }
        for _ in 0..40 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        }
    }

    #[test]
    fn stable_connection_resets_attempts() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        let start = Instant::now();
        backoff.next_delay();
        backoff.next_delay();

        backoff.connected(start);
        backoff.disconnected(start + Duration::from_secs(3));
        assert_eq!(backoff.attempt(), 2);

        backoff.connected(start);
        backoff.disconnected(start + Duration::from_secs(10));
        assert_eq!(backoff.attempt(), 0);
    }

    proptest::proptest! {
        #[test]
        fn delay_never_exceeds_cap(
            initial_ms in 1u64..10_000,
            max_ms in 1u64..120_000,
            attempts in 0usize..80,
        ) {
            let max = Duration::from_millis(max_ms);
            let mut backoff = ReconnectBackoff::new(
                Duration::from_millis(initial_ms),
                max,
                Duration::from_secs(60),
            );
            let mut previous = Duration::ZERO;
            for _ in 0..attempts {
                let delay = backoff.next_delay();
                proptest::prop_assert!(delay <= max);
                // Jitter stays under the next doubling, so delays never shrink.
                proptest::prop_assert!(delay >= previous.min(max));
                previous = delay;
            }
        }
    }
}
