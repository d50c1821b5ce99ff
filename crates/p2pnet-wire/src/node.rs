//! Node: TCP listener plus outbound dialing.
//!
//! A [`Node`] binds the configured listen address and answers every inbound
//! connection as the handshake responder. After negotiation (and the
//! optional sub-protocol upgrade) the peer is recorded in the [`PeerStore`]
//! and the connection is served by the shared [`Dispatcher`] on its own
//! task. Outbound connections made through [`Node::connect`] are served the
//! same way.
//!
//! The node counts live connections per peer id and touches the store again
//! only when the last one ends: an outbound peer is marked `NotConnected`,
//! an inbound peer is forgotten, since its id is the dialer's ephemeral
//! address and will not be seen again.

use crate::connection::{open_and_upgrade, CloseHandle, Connection};
use crate::dispatch::Dispatcher;
use crate::error::{WireError, WireResult};
use crate::frame::FrameOptions;
use crate::handshake::{ProtocolId, Role};
use crate::store::PeerStore;
use p2pnet_types::config::NetworkConfig;
use p2pnet_types::peer::{ConnectionType, PeerInfo};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// The local network endpoint.
pub struct Node {
    config: NetworkConfig,
    local_addr: SocketAddr,
    protocol: ProtocolId,
    sub_protocols: Vec<ProtocolId>,
    dispatcher: Arc<Dispatcher>,
    peers: Arc<dyn PeerStore>,
    live: Mutex<HashMap<String, usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Inbound,
    Outbound,
}

impl Node {
    /// Bind the listener and spawn the accept loop.
    ///
    /// Fails early if the configured protocol lines are invalid or the
    /// address cannot be bound. Aborting the returned handle stops accepting;
    /// connections already being served run to completion.
    pub async fn start(
        config: NetworkConfig,
        dispatcher: Arc<Dispatcher>,
        peers: Arc<dyn PeerStore>,
    ) -> WireResult<(Arc<Self>, tokio::task::JoinHandle<()>)> {
        let protocol = ProtocolId::new(config.protocol_id.clone())?;
        let sub_protocols = config
            .sub_protocols
            .iter()
            .map(|p| ProtocolId::new(p.clone()))
            .collect::<WireResult<Vec<_>>>()?;

        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, protocol = %protocol, "listening for peers");

        let node = Arc::new(Self {
            config,
            local_addr,
            protocol,
            sub_protocols,
            dispatcher,
            peers,
            live: Mutex::new(HashMap::new()),
        });

        let node_clone = Arc::clone(&node);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, node_clone).await;
        });

        Ok((node, accept_handle))
    }

    /// The actual bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn peers(&self) -> &Arc<dyn PeerStore> {
        &self.peers
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Dial a peer, negotiate, and serve the connection in the background.
    ///
    /// When sub-protocols are configured the first one is requested, so two
    /// nodes sharing a configuration can talk to each other. The returned
    /// handle closes the connection.
    pub async fn connect(self: &Arc<Self>, address: &str, port: u16) -> WireResult<CloseHandle> {
        let mut conn = open_and_upgrade(address, port, &self.config).await?;
        let peer = match conn.peer_addr() {
            Some(addr) => PeerInfo::from_socket_addr(addr, ConnectionType::Connected),
            None => PeerInfo {
                id: format!("{address}:{port}"),
                addrs: Vec::new(),
                connection: ConnectionType::Connected,
            },
        };
        self.attach(peer.clone());

        let handle = conn.close_handle();
        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.serve_peer(&mut conn, peer, Direction::Outbound).await;
        });
        Ok(handle)
    }

    /// Dial every configured bootstrap peer. Returns how many connected.
    pub async fn bootstrap(self: &Arc<Self>) -> usize {
        let mut connected = 0;
        for entry in &self.config.bootstrap_peers {
            let Some((host, port)) = split_host_port(entry) else {
                warn!(peer = %entry, "ignoring malformed bootstrap peer");
                continue;
            };
            match self.connect(host, port).await {
                Ok(_) => connected += 1,
                Err(e) => warn!(peer = %entry, error = %e, "bootstrap peer unreachable"),
            }
        }
        info!(connected, total = self.config.bootstrap_peers.len(), "bootstrap finished");
        connected
    }

    async fn accept_loop(listener: TcpListener, node: Arc<Node>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "accepted connection");
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_inbound(stream, addr).await {
                            debug!(peer = %addr, error = %e, "inbound connection rejected");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Responder handshake, optional upgrade, then the dispatch loop.
    async fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) -> WireResult<()> {
        let mut conn = Connection::new(stream, Some(addr), FrameOptions::from(&self.config));
        if let Err(e) = self.negotiate_inbound(&mut conn).await {
            conn.close().await;
            return Err(e);
        }

        let peer = PeerInfo::from_socket_addr(addr, ConnectionType::Connected);
        self.attach(peer.clone());
        self.serve_peer(&mut conn, peer, Direction::Inbound).await;
        Ok(())
    }

    async fn negotiate_inbound(&self, conn: &mut Connection) -> WireResult<()> {
        conn.negotiate(Role::Responder, self.protocol.clone()).await?;
        if !self.sub_protocols.is_empty() {
            let selected = conn.accept_protocol(&self.sub_protocols).await?;
            debug!(conn = %conn.id(), protocol = %selected, "stream upgraded");
        }
        Ok(())
    }

    async fn serve_peer(&self, conn: &mut Connection, peer: PeerInfo, direction: Direction) {
        info!(conn = %conn.id(), peer = %peer.id, "peer connected");
        match self
            .dispatcher
            .serve(conn, self.config.close_on_decode_error)
            .await
        {
            Ok(()) => debug!(conn = %conn.id(), "connection finished"),
            Err(WireError::Timeout(limit)) => {
                debug!(conn = %conn.id(), ?limit, "connection idle, closing")
            }
            Err(e) => warn!(conn = %conn.id(), error = %e, "connection ended with error"),
        }
        conn.close().await;
        self.detach(peer, direction);
    }

    /// Count a new live connection and record the peer as connected.
    fn attach(&self, peer: PeerInfo) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        *live.entry(peer.id.clone()).or_insert(0) += 1;
        self.peers.upsert(peer);
    }

    /// Drop one live connection; the store changes only when it was the last.
    fn detach(&self, mut peer: PeerInfo, direction: Direction) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        let remaining = match live.get_mut(&peer.id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            debug!(peer = %peer.id, remaining, "peer still has live connections");
            return;
        }
        live.remove(&peer.id);

        info!(peer = %peer.id, ?direction, "peer disconnected");
        match direction {
            Direction::Inbound => {
                self.peers.remove(&peer.id);
            }
            Direction::Outbound => {
                peer.connection = ConnectionType::NotConnected;
                self.peers.upsert(peer);
            }
        }
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
fn split_host_port(entry: &str) -> Option<(&str, u16)> {
    let (host, port) = entry.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}
