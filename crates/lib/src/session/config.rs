//! Client session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{
    BACKOFF_DELAYS_MS, DEFAULT_THROTTLE_MS, HEARTBEAT_INTERVAL_MS, HISTORY_LIMIT, MAX_THROTTLE_MS,
    MIN_THROTTLE_MS, PONG_TIMEOUT_MS, SLOW_BACKOFF_DELAYS_MS,
};

/// Tunables of a client session. All durations are in milliseconds.
///
/// Missing fields take their defaults when deserialized:
///
/// ```
/// use trellis::session::SessionConfig;
///
/// let config: SessionConfig = serde_json::from_str(r#"{"throttle": 5000}"#).unwrap();
/// assert_eq!(config.throttle_duration().as_millis(), 1000);
/// assert_eq!(config.history_limit, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum delay between two flushes of the outgoing buffer.
    pub throttle: u64,
    /// Entries kept on each of the undo and redo stacks.
    pub history_limit: usize,
    pub heartbeat_interval: u64,
    pub pong_timeout: u64,
    /// Reconnect delays after a socket failure; the last one repeats.
    pub backoff_delays: Vec<u64>,
    /// Reconnect delays after an authentication failure or fatal close code.
    pub slow_backoff_delays: Vec<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            throttle: DEFAULT_THROTTLE_MS,
            history_limit: HISTORY_LIMIT,
            heartbeat_interval: HEARTBEAT_INTERVAL_MS,
            pong_timeout: PONG_TIMEOUT_MS,
            backoff_delays: BACKOFF_DELAYS_MS.to_vec(),
            slow_backoff_delays: SLOW_BACKOFF_DELAYS_MS.to_vec(),
        }
    }
}

impl SessionConfig {
    /// Sets the flush throttle, clamped to the accepted range.
    pub fn with_throttle(mut self, throttle_ms: u64) -> Self {
        self.throttle = throttle_ms;
        self.throttle = self.clamped_throttle();
        self
    }

    /// Returns the config with out-of-range values corrected.
    pub fn normalized(mut self) -> Self {
        self.throttle = self.clamped_throttle();
        if self.backoff_delays.is_empty() {
            self.backoff_delays = BACKOFF_DELAYS_MS.to_vec();
        }
        if self.slow_backoff_delays.is_empty() {
            self.slow_backoff_delays = SLOW_BACKOFF_DELAYS_MS.to_vec();
        }
        self.history_limit = self.history_limit.max(1);
        self
    }

    fn clamped_throttle(&self) -> u64 {
        let clamped = self.throttle.clamp(MIN_THROTTLE_MS, MAX_THROTTLE_MS);
        if clamped != self.throttle {
            warn!(
                requested = self.throttle,
                used = clamped,
                "Throttle outside [{MIN_THROTTLE_MS}, {MAX_THROTTLE_MS}]ms, clamping"
            );
        }
        clamped
    }

    pub fn throttle_duration(&self) -> Duration {
        Duration::from_millis(self.throttle.clamp(MIN_THROTTLE_MS, MAX_THROTTLE_MS))
    }

    pub fn heartbeat_duration(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn pong_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.pong_timeout)
    }
}
