//! Network configuration.
//!
//! Every field has a default so a partial TOML file (or none at all) yields a
//! usable configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Protocol line exchanged before any application framing.
pub const DEFAULT_PROTOCOL_ID: &str = "/multistream/1.0.0\n";

/// Default upper bound on a single frame payload (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Configuration for the transport, negotiation and listener layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the inbound listener binds to.
    pub listen_addr: SocketAddr,
    /// Protocol line both peers must agree on, newline included.
    pub protocol_id: String,
    /// Sub-protocols a listener accepts after the base negotiation.
    /// Empty means no upgrade step is performed.
    pub sub_protocols: Vec<String>,
    /// Largest frame payload accepted from a peer, in bytes.
    pub max_frame_size: usize,
    /// Deadline for a single frame write, or for a frame read once its
    /// first byte has arrived.
    pub io_timeout_ms: u64,
    /// How long a served connection may sit between frames before it is
    /// dropped. Unset keeps idle connections open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    /// Deadline for establishing an outbound TCP connection.
    pub connect_timeout_ms: u64,
    /// First delay used when the transport reports "would block".
    pub backoff_min_ms: u64,
    /// Cap on the retry delay.
    pub backoff_max_ms: u64,
    /// Close a served connection on the first undecodable message instead
    /// of skipping it.
    pub close_on_decode_error: bool,
    /// Peers to dial at startup, as `host:port`.
    pub bootstrap_peers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 4001)),
            protocol_id: DEFAULT_PROTOCOL_ID.to_string(),
            sub_protocols: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            io_timeout_ms: 30_000,
            idle_timeout_ms: None,
            connect_timeout_ms: 10_000,
            backoff_min_ms: 5,
            backoff_max_ms: 500,
            close_on_decode_error: false,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl NetworkConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_min(&self) -> Duration {
        Duration::from_millis(self.backoff_min_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}
