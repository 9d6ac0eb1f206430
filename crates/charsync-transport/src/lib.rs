//! Transport abstraction for charsync ingress nodes.
//!
//! Provides the [`Transport`] and [`Connection`] traits plus the
//! [`ConnectionId`] every other layer uses to tell live connections apart.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::{BoxError, TransportError};
#[cfg(feature = "websocket")]
pub use websocket::{DEFAULT_UPGRADE_TIMEOUT, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use rand::Rng;

/// Fleet-wide identifier for one live connection.
///
/// Nodes share no memory, so ids can't come from a per-process counter:
/// two nodes would hand out the same `1`. Instead each id is 128 random
/// bits, which makes collisions across the fleet a non-issue. The id is
/// what the presence registry stores under `UID:<uid>`, so it also has a
/// stable string form (32 lowercase hex digits) that round-trips through
/// [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u128);

impl ConnectionId {
    /// Creates a `ConnectionId` from a raw value.
    pub fn new(id: u128) -> Self {
        Self(id)
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(rand::rng().random())
    }

    /// Returns the underlying value.
    pub fn into_inner(self) -> u128 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(Self)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends data to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// The socket's remote address.
    fn peer_addr(&self) -> SocketAddr;

    /// The address the client connected from. Failed authentications
    /// are throttled per client address.
    fn client_ip(&self) -> IpAddr {
        self.peer_addr().ip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display_is_fixed_width_hex() {
        let id = ConnectionId::new(0xabc);
        assert_eq!(id.to_string(), format!("{:0>32}", "abc"));
    }

    #[test]
    fn test_connection_id_round_trips_through_string() {
        let id = ConnectionId::generate();
        let parsed: ConnectionId = id.to_string().parse().expect("valid hex");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_connection_id_parse_rejects_garbage() {
        assert!("not-hex".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn test_connection_id_generate_is_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
    }
}
