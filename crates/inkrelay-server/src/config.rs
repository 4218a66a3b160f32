//! Server configuration.

use std::net::SocketAddr;
use std::str::FromStr;

use tracing::warn;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3030);
/// Requests buffered per room before senders wait.
pub const DEFAULT_ROOM_QUEUE_CAPACITY: usize = 1024;
/// Broadcasts buffered per member before it lags.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Depth of each room's serialized request queue
    pub room_queue_capacity: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(DEFAULT_BIND_ADDR),
            room_queue_capacity: DEFAULT_ROOM_QUEUE_CAPACITY,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Read overrides from `INKRELAY_ADDR`, `INKRELAY_ROOM_QUEUE` and
    /// `INKRELAY_BROADCAST_CAPACITY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: parse_or(&lookup, "INKRELAY_ADDR", defaults.bind_addr),
            room_queue_capacity: parse_or(&lookup, "INKRELAY_ROOM_QUEUE", defaults.room_queue_capacity).max(1),
            broadcast_capacity: parse_or(&lookup, "INKRELAY_BROADCAST_CAPACITY", defaults.broadcast_capacity).max(1),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}
