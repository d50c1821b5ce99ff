//! Errors from the wire protocol layer.

use crate::handshake::NegotiationState;
use crate::varint::VarintError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed varint length prefix")]
    MalformedVarint,
    #[error("varint length prefix overflows 64 bits")]
    VarintOverflow,
    #[error("buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: usize },
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol mismatch: expected {expected:?}, received {received:?}")]
    ProtocolMismatch { expected: String, received: String },
    #[error("connection to {address} failed: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: Box<WireError>,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid protocol id {0:?}")]
    InvalidProtocolId(String),
    #[error("operation not allowed in negotiation state {0:?}")]
    InvalidState(NegotiationState),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the connection must be closed after this error.
    ///
    /// Only a message that failed to decode leaves the stream in sync.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WireError::Decode(_))
    }
}

impl From<VarintError> for WireError {
    fn from(err: VarintError) -> Self {
        match err {
            VarintError::Malformed => WireError::MalformedVarint,
            VarintError::Overflow => WireError::VarintOverflow,
            VarintError::BufferTooSmall { needed, capacity } => {
                WireError::BufferTooSmall { needed, capacity }
            }
        }
    }
}

impl From<prost::DecodeError> for WireError {
    fn from(err: prost::DecodeError) -> Self {
        WireError::Decode(err.to_string())
    }
}

pub type WireResult<T> = Result<T, WireError>;
