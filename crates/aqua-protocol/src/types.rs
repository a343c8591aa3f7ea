use serde::{Deserialize, Serialize};
use std::fmt;

/// Default lease granted by the broker, in milliseconds.
pub const DEFAULT_LEASE_TIME_MS: u64 = 3_000;

/// Default time a tank may hold the token before passing it left.
pub const DEFAULT_TOKEN_HOLD_MS: u64 = 3_000;

/// Well-known broker port.
pub const DEFAULT_BROKER_PORT: u16 = 4711;

/// Broker-minted tank identity (`client1`, `client2`, ...).
///
/// Stable across lease renewals of the same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id minted from the directory's counter.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("client{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A side of the ring, and the travel direction of a fish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => f.write_str("left"),
            Direction::Right => f.write_str("right"),
        }
    }
}

/// Where a tank believes a fish currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FishLocation {
    Here,
    Left,
    Right,
}

impl From<Direction> for FishLocation {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Left => FishLocation::Left,
            Direction::Right => FishLocation::Right,
        }
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
