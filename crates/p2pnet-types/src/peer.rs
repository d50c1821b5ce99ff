//! Peer descriptors exchanged between routing participants.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Connectivity of a peer as seen by the sender of a message.
///
/// Discriminants match the values carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionType {
    /// No connection to the peer, no extra information.
    #[default]
    NotConnected = 0,
    /// Live connection to the peer.
    Connected = 1,
    /// Recently connected, but not currently.
    CanConnect = 2,
    /// Recently tried to connect and failed.
    CannotConnect = 3,
}

impl ConnectionType {
    /// Map a wire value; unknown values degrade to `NotConnected`.
    pub fn from_wire(value: i32) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::CanConnect,
            3 => Self::CannotConnect,
            _ => Self::NotConnected,
        }
    }

    pub fn as_wire(self) -> i32 {
        self as i32
    }
}

/// A known peer: identity plus the addresses it can be reached on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer identifier.
    pub id: String,
    /// Multiaddr-style address strings, e.g. `/ip4/127.0.0.1/tcp/4001`.
    pub addrs: Vec<String>,
    /// Last known connectivity.
    pub connection: ConnectionType,
}

impl PeerInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addrs: Vec::new(),
            connection: ConnectionType::NotConnected,
        }
    }

    /// Describe a peer known only by its socket address.
    pub fn from_socket_addr(addr: SocketAddr, connection: ConnectionType) -> Self {
        Self {
            id: addr.to_string(),
            addrs: vec![multiaddr_of(addr)],
            connection,
        }
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }
}

/// Render a socket address as a `/ip4|ip6/<ip>/tcp/<port>` string.
pub fn multiaddr_of(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => format!("/ip4/{}/tcp/{}", v4.ip(), v4.port()),
        SocketAddr::V6(v6) => format!("/ip6/{}/tcp/{}", v6.ip(), v6.port()),
    }
}
