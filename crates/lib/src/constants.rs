//! Constants used throughout the trellis library.
//!
//! This module provides central definitions for reserved identifiers, the
//! position alphabet and session timing defaults.

/// Reserved node id of the tree root.
pub const ROOT_ID: &str = "root";

/// Reserved node id carried by acknowledgement ops sent for ignored operations.
pub const ACK_ID: &str = "ACK";

/// Smallest byte of the position alphabet. A missing byte compares as this value.
pub const POSITION_MIN: u8 = 32;

/// Largest byte of the position alphabet.
pub const POSITION_MAX: u8 = 126;

/// Maximum number of entries kept on each of the undo and redo stacks.
pub const HISTORY_LIMIT: usize = 50;

/// Default delay between two flushes of the outgoing buffer, in milliseconds.
pub const DEFAULT_THROTTLE_MS: u64 = 100;

/// Lowest accepted flush throttle, in milliseconds.
pub const MIN_THROTTLE_MS: u64 = 80;

/// Highest accepted flush throttle, in milliseconds.
pub const MAX_THROTTLE_MS: u64 = 1000;

/// Interval between two heartbeat pings, in milliseconds.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// How long to wait for a pong before tearing the socket down, in milliseconds.
pub const PONG_TIMEOUT_MS: u64 = 2_000;

/// Reconnect delays after a recoverable socket failure, in milliseconds.
pub const BACKOFF_DELAYS_MS: [u64; 7] = [250, 500, 1_000, 2_000, 4_000, 8_000, 10_000];

/// Reconnect delays after an authentication failure or a fatal close code, in milliseconds.
pub const SLOW_BACKOFF_DELAYS_MS: [u64; 4] = [2_000, 30_000, 60_000, 300_000];
