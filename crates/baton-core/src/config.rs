//! Configuration for the turn services
//!
//! Lifecycle: defaults → TOML file → `BATON_*` environment overrides →
//! validation. Durations are integer milliseconds.

use crate::errors::BatonError;
use crate::rate_limit::WindowPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "BATON_";

/// Trait for configuration validation
pub trait ConfigValidation {
    /// Validate this configuration
    fn validate(&self) -> Result<(), BatonError>;
}

/// Stuck-turn watchdog settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// A turn idle strictly longer than this is stale
    pub stale_after_ms: u64,
    /// Minimum spacing of opportunistic sweeps per session
    pub min_interval_ms: u64,
    /// Consecutive timeouts that mark a standard participant inactive
    pub escalate_after: u32,
    /// Also force-advance a privileged turn that is not in failover
    pub force_privileged: bool,
}

impl WatchdogConfig {
    /// Stale threshold
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Sweep spacing
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 300_000,
            min_interval_ms: 10_000,
            escalate_after: 2,
            force_privileged: false,
        }
    }
}

impl ConfigValidation for WatchdogConfig {
    fn validate(&self) -> Result<(), BatonError> {
        if self.stale_after_ms == 0 {
            return Err(BatonError::invalid("watchdog.stale_after_ms must be > 0"));
        }
        if self.escalate_after == 0 {
            return Err(BatonError::invalid("watchdog.escalate_after must be >= 1"));
        }
        Ok(())
    }
}

/// Privileged-role continuity settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityConfig {
    /// Presence older than this marks the privileged participant inactive
    pub stale_after_ms: u64,
    /// Minimum spacing of opportunistic checks per session
    pub min_interval_ms: u64,
}

impl ContinuityConfig {
    /// Presence threshold
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Check spacing
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 300_000,
            min_interval_ms: 10_000,
        }
    }
}

impl ConfigValidation for ContinuityConfig {
    fn validate(&self) -> Result<(), BatonError> {
        if self.stale_after_ms == 0 {
            return Err(BatonError::invalid("continuity.stale_after_ms must be > 0"));
        }
        Ok(())
    }
}

/// Change feed settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Poll interval
    pub tick_ms: u64,
    /// Idle time before a heartbeat frame
    pub keepalive_ms: u64,
    /// Outbound frames buffered per observer
    pub channel_capacity: usize,
    /// Events read per tick
    pub event_batch_limit: usize,
}

impl FeedConfig {
    /// Poll interval
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Keep-alive interval
    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tick_ms: 2_000,
            keepalive_ms: 15_000,
            channel_capacity: 64,
            event_batch_limit: 200,
        }
    }
}

impl ConfigValidation for FeedConfig {
    fn validate(&self) -> Result<(), BatonError> {
        if self.tick_ms == 0 {
            return Err(BatonError::invalid("feed.tick_ms must be > 0"));
        }
        if self.keepalive_ms < self.tick_ms {
            return Err(BatonError::invalid("feed.keepalive_ms must be >= feed.tick_ms"));
        }
        if self.channel_capacity == 0 || self.event_batch_limit == 0 {
            return Err(BatonError::invalid(
                "feed.channel_capacity and feed.event_batch_limit must be > 0",
            ));
        }
        Ok(())
    }
}

/// One fixed-window layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Maximum hits per window
    pub max: u32,
    /// Window length
    pub window_ms: u64,
}

impl WindowConfig {
    /// Create a layer config
    pub const fn new(max: u32, window_ms: u64) -> Self {
        Self { max, window_ms }
    }

    /// Policy for the store
    pub fn policy(&self) -> WindowPolicy {
        WindowPolicy::new(self.max, Duration::from_millis(self.window_ms))
    }
}

/// Rate-limit layers gating the transition protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Short burst, per participant per session
    pub participant_burst: WindowConfig,
    /// Sustained rate, per participant per session
    pub participant_sustained: WindowConfig,
    /// All sessions, per participant
    pub participant_global: WindowConfig,
    /// Short burst, per session
    pub session_burst: WindowConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            participant_burst: WindowConfig::new(5, 5_000),
            participant_sustained: WindowConfig::new(30, 60_000),
            participant_global: WindowConfig::new(120, 60_000),
            session_burst: WindowConfig::new(20, 5_000),
        }
    }
}

impl RateLimitConfig {
    fn layers(&self) -> [(&'static str, WindowConfig); 4] {
        [
            ("participant_burst", self.participant_burst),
            ("participant_sustained", self.participant_sustained),
            ("participant_global", self.participant_global),
            ("session_burst", self.session_burst),
        ]
    }

    fn layer_mut(&mut self, name: &str) -> Option<&mut WindowConfig> {
        match name {
            "participant_burst" => Some(&mut self.participant_burst),
            "participant_sustained" => Some(&mut self.participant_sustained),
            "participant_global" => Some(&mut self.participant_global),
            "session_burst" => Some(&mut self.session_burst),
            _ => None,
        }
    }
}

impl ConfigValidation for RateLimitConfig {
    fn validate(&self) -> Result<(), BatonError> {
        for (name, layer) in self.layers() {
            if layer.max == 0 || layer.window_ms == 0 {
                return Err(BatonError::invalid(format!(
                    "rate_limits.{name} needs max > 0 and window_ms > 0"
                )));
            }
        }
        Ok(())
    }
}

/// Store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bound on waiting for the store's critical section
    pub lock_timeout_ms: u64,
}

impl StoreConfig {
    /// Lock wait bound
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
        }
    }
}

impl ConfigValidation for StoreConfig {
    fn validate(&self) -> Result<(), BatonError> {
        if self.lock_timeout_ms == 0 {
            return Err(BatonError::invalid("store.lock_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatonConfig {
    /// Stuck-turn watchdog
    pub watchdog: WatchdogConfig,
    /// Privileged-role continuity
    pub continuity: ContinuityConfig,
    /// Change feed
    pub feed: FeedConfig,
    /// Transition rate limits
    pub rate_limits: RateLimitConfig,
    /// Store
    pub store: StoreConfig,
}

impl BatonConfig {
    /// Parse TOML text over the defaults
    pub fn from_toml_str(text: &str) -> Result<Self, BatonError> {
        toml::from_str(text).map_err(|e| BatonError::invalid(format!("Invalid TOML: {e}")))
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self, BatonError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BatonError::internal(format!("Failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, BatonError> {
        toml::to_string_pretty(self)
            .map_err(|e| BatonError::internal(format!("Failed to render config: {e}")))
    }

    /// Merge with environment variables
    ///
    /// `BATON_WATCHDOG_STALE_AFTER_MS=60000` sets `watchdog.stale_after_ms`;
    /// `BATON_RATE_LIMITS_SESSION_BURST_MAX=40` sets
    /// `rate_limits.session_burst.max`.
    pub fn merge_with_env(&mut self) -> Result<(), BatonError> {
        self.merge_with_vars(std::env::vars())
    }

    /// Merge `BATON_*` pairs from any source
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<(), BatonError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some(dotted) = env_key_to_dotted(&rest.to_lowercase()) else {
                tracing::debug!(key = %key, "ignoring unrecognized config override");
                continue;
            };
            self.set_from_string(&dotted, &value)?;
        }
        Ok(())
    }

    /// Set a configuration value from a dotted key
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), BatonError> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["watchdog", "stale_after_ms"] => self.watchdog.stale_after_ms = parse(key, value)?,
            ["watchdog", "min_interval_ms"] => self.watchdog.min_interval_ms = parse(key, value)?,
            ["watchdog", "escalate_after"] => self.watchdog.escalate_after = parse(key, value)?,
            ["watchdog", "force_privileged"] => {
                self.watchdog.force_privileged = parse(key, value)?;
            }
            ["continuity", "stale_after_ms"] => {
                self.continuity.stale_after_ms = parse(key, value)?;
            }
            ["continuity", "min_interval_ms"] => {
                self.continuity.min_interval_ms = parse(key, value)?;
            }
            ["feed", "tick_ms"] => self.feed.tick_ms = parse(key, value)?,
            ["feed", "keepalive_ms"] => self.feed.keepalive_ms = parse(key, value)?,
            ["feed", "channel_capacity"] => self.feed.channel_capacity = parse(key, value)?,
            ["feed", "event_batch_limit"] => self.feed.event_batch_limit = parse(key, value)?,
            ["store", "lock_timeout_ms"] => self.store.lock_timeout_ms = parse(key, value)?,
            ["rate_limits", layer, field] => {
                let window = self
                    .rate_limits
                    .layer_mut(layer)
                    .ok_or_else(|| BatonError::invalid(format!("Unknown config key: {key}")))?;
                match *field {
                    "max" => window.max = parse(key, value)?,
                    "window_ms" => window.window_ms = parse(key, value)?,
                    _ => return Err(BatonError::invalid(format!("Unknown config key: {key}"))),
                }
            }
            _ => return Err(BatonError::invalid(format!("Unknown config key: {key}"))),
        }
        Ok(())
    }
}

impl ConfigValidation for BatonConfig {
    fn validate(&self) -> Result<(), BatonError> {
        self.watchdog.validate()?;
        self.continuity.validate()?;
        self.feed.validate()?;
        self.rate_limits.validate()?;
        self.store.validate()
    }
}

const SECTIONS: [&str; 5] = ["rate_limits", "watchdog", "continuity", "feed", "store"];

fn env_key_to_dotted(lower: &str) -> Option<String> {
    let section = SECTIONS
        .iter()
        .find(|s| lower.starts_with(&format!("{s}_")))?;
    let field = &lower[section.len() + 1..];
    if *section != "rate_limits" {
        return Some(format!("{section}.{field}"));
    }
    ["_window_ms", "_max"].iter().find_map(|suffix| {
        field
            .strip_suffix(suffix)
            .map(|layer| format!("rate_limits.{layer}.{}", &suffix[1..]))
    })
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, BatonError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| BatonError::invalid(format!("{key}={value}: {e}")))
}
