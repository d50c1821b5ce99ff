//! A negotiated, framed connection to one peer.
//!
//! [`Connection`] owns the transport. It is driven by a single task; other
//! tasks may only hold a [`CloseHandle`], which aborts whatever frame
//! operation is in flight and every later one.

use crate::error::{WireError, WireResult};
use crate::frame::{self, FrameOptions};
use crate::handshake::{self, NegotiationState, Negotiator, ProtocolId, Role};
use crate::message::{Message, MessageCodec};
use p2pnet_types::config::NetworkConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Any byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> Transport for T {}

/// Cloneable handle that closes a connection from another task.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    /// Make in-flight and later frame operations fail with
    /// [`WireError::ConnectionClosed`].
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct Connection {
    id: Uuid,
    stream: Box<dyn Transport>,
    peer_addr: Option<SocketAddr>,
    opts: FrameOptions,
    state: NegotiationState,
    protocol: Option<ProtocolId>,
    sub_protocol: Option<ProtocolId>,
    close_tx: Arc<watch::Sender<bool>>,
    close_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("protocol", &self.protocol)
            .field("sub_protocol", &self.sub_protocol)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap a transport. The connection starts in `Init`; nothing can be
    /// framed on it until [`Connection::negotiate`] succeeds.
    pub fn new<S>(stream: S, peer_addr: Option<SocketAddr>, opts: FrameOptions) -> Self
    where
        S: Transport + 'static,
    {
        let (close_tx, close_rx) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            stream: Box::new(stream),
            peer_addr,
            opts,
            state: NegotiationState::Init,
            protocol: None,
            sub_protocol: None,
            close_tx: Arc::new(close_tx),
            close_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn options(&self) -> &FrameOptions {
        &self.opts
    }

    /// Base protocol agreed on by the handshake.
    pub fn protocol(&self) -> Option<&ProtocolId> {
        self.protocol.as_ref()
    }

    /// Sub-protocol the stream was upgraded to, if any.
    pub fn sub_protocol(&self) -> Option<&ProtocolId> {
        self.sub_protocol.as_ref()
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            tx: Arc::clone(&self.close_tx),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.close_rx.borrow()
    }

    /// Run the multistream handshake in `role`.
    pub async fn negotiate(&mut self, role: Role, protocol: ProtocolId) -> WireResult<()> {
        if self.state != NegotiationState::Init {
            return Err(WireError::InvalidState(self.state));
        }

        let mut negotiator = Negotiator::new(role, protocol);
        let mut closed = self.close_rx.clone();
        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(WireError::ConnectionClosed),
            r = negotiator.negotiate(&mut self.stream, &self.opts) => r,
        };

        match result {
            Ok(()) => {
                self.state = NegotiationState::Negotiated;
                self.protocol = Some(negotiator.protocol().clone());
                debug!(conn = %self.id, role = ?role, "connection negotiated");
                Ok(())
            }
            Err(e) => {
                self.state = NegotiationState::Failed;
                Err(e)
            }
        }
    }

    /// Upgrade the stream to `protocol` as the dialing side.
    pub async fn select_protocol(&mut self, protocol: &ProtocolId) -> WireResult<()> {
        self.ensure_negotiated()?;
        let mut closed = self.close_rx.clone();
        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(WireError::ConnectionClosed),
            r = handshake::select_protocol(&mut self.stream, protocol, &self.opts) => r,
        };
        self.track(result)?;
        self.sub_protocol = Some(protocol.clone());
        Ok(())
    }

    /// Answer one upgrade request as the listening side.
    pub async fn accept_protocol(&mut self, supported: &[ProtocolId]) -> WireResult<ProtocolId> {
        self.ensure_negotiated()?;
        let mut closed = self.close_rx.clone();
        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(WireError::ConnectionClosed),
            r = handshake::accept_protocol(&mut self.stream, supported, &self.opts) => r,
        };
        let protocol = self.track(result)?;
        self.sub_protocol = Some(protocol.clone());
        Ok(protocol)
    }

    /// Send one frame. See [`frame::send_frame`] for the empty-payload rule.
    pub async fn send_frame(&mut self, payload: &[u8]) -> WireResult<usize> {
        self.ensure_negotiated()?;
        let mut closed = self.close_rx.clone();
        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(WireError::ConnectionClosed),
            r = frame::send_frame(&mut self.stream, payload, &self.opts) => r,
        };
        self.track(result)
    }

    /// Send a zero-length frame so an idle peer knows the link is alive.
    pub async fn send_keep_alive(&mut self) -> WireResult<usize> {
        self.ensure_negotiated()?;
        let mut closed = self.close_rx.clone();
        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(WireError::ConnectionClosed),
            r = frame::send_keep_alive(&mut self.stream, &self.opts) => r,
        };
        self.track(result)
    }

    pub async fn receive_frame(&mut self) -> WireResult<Vec<u8>> {
        self.ensure_negotiated()?;
        let mut closed = self.close_rx.clone();
        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(WireError::ConnectionClosed),
            r = frame::receive_frame(&mut self.stream, &self.opts) => r,
        };
        self.track(result)
    }

    pub async fn send_message(
        &mut self,
        codec: &dyn MessageCodec,
        message: &Message,
    ) -> WireResult<usize> {
        let payload = codec.encode(message);
        self.send_frame(&payload).await
    }

    /// Receive and decode one message. A decode failure leaves the
    /// connection usable.
    pub async fn receive_message(&mut self, codec: &dyn MessageCodec) -> WireResult<Message> {
        let payload = self.receive_frame().await?;
        codec.decode(&payload)
    }

    /// Signal closure and shut the transport down.
    pub async fn close(&mut self) {
        self.close_tx.send_replace(true);
        if let Err(e) = self.stream.shutdown().await {
            debug!(conn = %self.id, error = %e, "transport shutdown failed");
        }
    }

    fn ensure_negotiated(&self) -> WireResult<()> {
        if self.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        if self.state != NegotiationState::Negotiated {
            return Err(WireError::InvalidState(self.state));
        }
        Ok(())
    }

    fn track<T>(&mut self, result: WireResult<T>) -> WireResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.state = NegotiationState::Failed;
            }
        }
        result
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Dial `address:port`, run the initiator handshake with the configured
/// protocol and return the negotiated connection.
///
/// Any failure closes the transport and is reported as
/// [`WireError::ConnectionFailed`] wrapping the cause.
pub async fn open_and_negotiate(
    address: &str,
    port: u16,
    config: &NetworkConfig,
) -> WireResult<Connection> {
    let target = format!("{address}:{port}");
    match dial(&target, config).await {
        Ok(conn) => {
            info!(conn = %conn.id(), peer = %target, "connected to peer");
            Ok(conn)
        }
        Err(e) => {
            warn!(peer = %target, error = %e, "failed to connect to peer");
            Err(WireError::ConnectionFailed {
                address: target,
                source: Box::new(e),
            })
        }
    }
}

/// Like [`open_and_negotiate`], then upgrade the stream to the first entry
/// of `config.sub_protocols` when any are configured. A listener with
/// sub-protocols expects that request before any application frame.
pub async fn open_and_upgrade(
    address: &str,
    port: u16,
    config: &NetworkConfig,
) -> WireResult<Connection> {
    let mut conn = open_and_negotiate(address, port, config).await?;
    let Some(wanted) = config.sub_protocols.first() else {
        return Ok(conn);
    };

    let upgraded = match ProtocolId::new(wanted.clone()) {
        Ok(protocol) => conn.select_protocol(&protocol).await,
        Err(e) => Err(e),
    };
    if let Err(e) = upgraded {
        conn.close().await;
        let target = format!("{address}:{port}");
        warn!(peer = %target, error = %e, "sub-protocol upgrade failed");
        return Err(WireError::ConnectionFailed {
            address: target,
            source: Box::new(e),
        });
    }
    Ok(conn)
}

async fn dial(target: &str, config: &NetworkConfig) -> WireResult<Connection> {
    let protocol = ProtocolId::new(config.protocol_id.clone())?;
    let limit = config.connect_timeout();
    let stream = match tokio::time::timeout(limit, TcpStream::connect(target)).await {
        Ok(stream) => stream?,
        Err(_) => return Err(WireError::Timeout(limit)),
    };
    stream.set_nodelay(true)?;
    let peer_addr = stream.peer_addr().ok();

    let mut conn = Connection::new(stream, peer_addr, FrameOptions::from(config));
    if let Err(e) = conn.negotiate(Role::Initiator, protocol).await {
        conn.close().await;
        return Err(e);
    }
    Ok(conn)
}
