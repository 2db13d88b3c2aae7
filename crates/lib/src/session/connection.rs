//! Connection state machine and reconnect backoff.

use std::time::Duration;

use serde::Serialize;

/// Lifecycle of the socket of a session.
///
/// The normal path is `Closed -> Authenticating -> Connecting -> Open`.
/// `Unavailable` (socket lost, retrying) and `Failed` (authentication
/// rejected, retrying slowly) are reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Closed,
    Authenticating,
    Connecting,
    Open,
    Unavailable,
    Failed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// True while a connection attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Authenticating | ConnectionState::Connecting
        )
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Closed | Unavailable | Failed) => true,
            (Closed | Unavailable | Failed, Authenticating) => true,
            (Authenticating, Connecting) => true,
            (Connecting, Open) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Unavailable => "unavailable",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reconnect delays, walking a bounded table and sticking to its last entry.
#[derive(Debug, Clone)]
pub struct Backoff {
    fast: Vec<Duration>,
    slow: Vec<Duration>,
    attempt: usize,
}

impl Backoff {
    pub fn new(fast_ms: &[u64], slow_ms: &[u64]) -> Self {
        Self {
            fast: fast_ms.iter().copied().map(Duration::from_millis).collect(),
            slow: slow_ms.iter().copied().map(Duration::from_millis).collect(),
            attempt: 0,
        }
    }

    /// The delay before the next attempt. `slow` selects the slow table.
    pub fn next_delay(&mut self, slow: bool) -> Duration {
        let table = if slow { &self.slow } else { &self.fast };
        let delay = table
            .get(self.attempt)
            .or(table.last())
            .copied()
            .unwrap_or_default();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of failed attempts since the last successful connection.
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    /// Restarts from the first delay after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BACKOFF_DELAYS_MS, SLOW_BACKOFF_DELAYS_MS};

    #[test]
    fn test_backoff_caps_at_last_entry() {
        let mut backoff = Backoff::new(&BACKOFF_DELAYS_MS, &SLOW_BACKOFF_DELAYS_MS);
        let delays: Vec<u64> = (0..9)
            .map(|_| backoff.next_delay(false).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![250, 500, 1000, 2000, 4000, 8000, 10000, 10000, 10000]
        );
        backoff.reset();
        assert_eq!(backoff.next_delay(true), Duration::from_millis(2000));
    }

    #[test]
    fn test_transitions() {
        use ConnectionState::*;
        assert!(Closed.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Unavailable));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Open.can_transition_to(Connecting));
    }
}
