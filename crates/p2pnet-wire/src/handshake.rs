//! Multistream handshake.
//!
//! Before any binary framing, each side sends its protocol line (for example
//! `/multistream/1.0.0\n`) as a single frame and reads the peer's. The
//! connection is usable only if the two lines are byte-for-byte identical;
//! both roles apply the same exact comparison.
//!
//! After the base handshake a dialer may ask to switch the stream to a
//! sub-protocol ([`select_protocol`]); the listener either echoes the line
//! back or answers `na\n` ([`accept_protocol`]).
//!
//! Every read here expects a reply, so it is bounded by the I/O timeout even
//! when the options leave idle waits unbounded.

use crate::error::{WireError, WireResult};
use crate::frame::{receive_frame, send_frame, FrameOptions};
use p2pnet_types::config::DEFAULT_PROTOCOL_ID;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Reply sent by a listener that does not support the requested protocol.
pub const NOT_AVAILABLE: &[u8] = b"na\n";

/// A newline-terminated ASCII protocol line. Equality is byte-exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolId(String);

impl ProtocolId {
    /// Validate a protocol line: printable ASCII followed by exactly one
    /// trailing `\n`.
    pub fn new(id: impl Into<String>) -> WireResult<Self> {
        let id = id.into();
        let body = match id.strip_suffix('\n') {
            Some(body) => body,
            None => return Err(WireError::InvalidProtocolId(id)),
        };
        let valid = !body.is_empty() && body.bytes().all(|b| b.is_ascii_graphic() || b == b' ');
        if !valid || id.as_bytes() == NOT_AVAILABLE {
            return Err(WireError::InvalidProtocolId(id));
        }
        Ok(Self(id))
    }

    /// `/multistream/1.0.0\n`
    pub fn multistream() -> Self {
        Self(DEFAULT_PROTOCOL_ID.to_string())
    }

    /// The full line, newline included, as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The protocol name without the trailing newline.
    pub fn name(&self) -> &str {
        self.0.trim_end_matches('\n')
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress of a negotiation. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Init,
    Sent,
    AwaitingPeer,
    Negotiated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection.
    Initiator,
    /// Accepted the connection.
    Responder,
}

/// Drives the handshake state machine for one connection.
#[derive(Debug)]
pub struct Negotiator {
    role: Role,
    protocol: ProtocolId,
    state: NegotiationState,
}

impl Negotiator {
    pub fn new(role: Role, protocol: ProtocolId) -> Self {
        Self {
            role,
            protocol,
            state: NegotiationState::Init,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    /// Send our protocol line, read the peer's and require an exact match.
    ///
    /// Only valid from `Init`. Any failure leaves the negotiator in `Failed`.
    pub async fn negotiate<S>(&mut self, stream: &mut S, opts: &FrameOptions) -> WireResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        if self.state != NegotiationState::Init {
            return Err(WireError::InvalidState(self.state));
        }

        match self.exchange(stream, opts).await {
            Ok(()) => {
                self.state = NegotiationState::Negotiated;
                debug!(role = ?self.role, protocol = %self.protocol, "negotiated");
                Ok(())
            }
            Err(e) => {
                self.state = NegotiationState::Failed;
                warn!(role = ?self.role, protocol = %self.protocol, error = %e, "negotiation failed");
                Err(e)
            }
        }
    }

    async fn exchange<S>(&mut self, stream: &mut S, opts: &FrameOptions) -> WireResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        send_frame(stream, self.protocol.as_bytes(), opts).await?;
        self.state = NegotiationState::Sent;

        self.state = NegotiationState::AwaitingPeer;
        let reply = receive_frame(stream, &opts.awaiting_reply()).await?;
        if reply != self.protocol.as_bytes() {
            return Err(WireError::ProtocolMismatch {
                expected: self.protocol.name().to_string(),
                received: String::from_utf8_lossy(&reply).into_owned(),
            });
        }
        Ok(())
    }
}

/// Ask the peer to switch the stream to `protocol`. The peer must echo the
/// line back unchanged.
pub async fn select_protocol<S>(
    stream: &mut S,
    protocol: &ProtocolId,
    opts: &FrameOptions,
) -> WireResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    send_frame(stream, protocol.as_bytes(), opts).await?;
    let reply = receive_frame(stream, &opts.awaiting_reply()).await?;
    if reply == protocol.as_bytes() {
        debug!(protocol = %protocol, "sub-protocol selected");
        return Ok(());
    }
    Err(WireError::ProtocolMismatch {
        expected: protocol.name().to_string(),
        received: String::from_utf8_lossy(&reply).into_owned(),
    })
}

/// Read one protocol request and answer it: echo it if it is in
/// `supported`, otherwise reply `na\n` and fail.
pub async fn accept_protocol<S>(
    stream: &mut S,
    supported: &[ProtocolId],
    opts: &FrameOptions,
) -> WireResult<ProtocolId>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let request = receive_frame(stream, &opts.awaiting_reply()).await?;
    if let Some(protocol) = supported.iter().find(|p| p.as_bytes() == request) {
        send_frame(stream, protocol.as_bytes(), opts).await?;
        debug!(protocol = %protocol, "sub-protocol accepted");
        return Ok(protocol.clone());
    }

    send_frame(stream, NOT_AVAILABLE, opts).await?;
    Err(WireError::ProtocolMismatch {
        expected: supported
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(", "),
        received: String::from_utf8_lossy(&request).into_owned(),
    })
}
