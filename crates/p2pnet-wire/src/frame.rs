//! Length-prefixed frames over a byte stream.
//!
//! A frame on the wire is `varint(len) || len bytes`. The length prefix is
//! read one byte at a time straight from the stream and checked against the
//! configured maximum before any payload buffer is allocated; the buffer is
//! then sized to exactly the declared length.
//!
//! Transient "would block" signals from the transport are retried with
//! backoff inside these functions. A send is bounded by
//! [`FrameOptions::io_timeout`]; a receive waits for the first length byte
//! for up to [`FrameOptions::idle_timeout`] (forever when unset) and is
//! bounded by `io_timeout` from that byte on.

use crate::error::{WireError, WireResult};
use crate::retry::{is_transient, Backoff, BackoffConfig};
use crate::varint::{self, VarintDecoder, MAX_VARINT_LEN};
use p2pnet_types::config::{NetworkConfig, DEFAULT_MAX_FRAME_SIZE};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Limits applied to every frame operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOptions {
    /// Largest payload accepted by [`receive_frame`].
    pub max_frame_size: usize,
    /// Deadline for one whole send, or for a receive once its first byte
    /// has arrived.
    pub io_timeout: Duration,
    /// How long a receive may wait for a frame to start. `None` waits
    /// indefinitely.
    pub idle_timeout: Option<Duration>,
    /// Delays used while the transport is not ready.
    pub backoff: BackoffConfig,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            io_timeout: Duration::from_secs(30),
            idle_timeout: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl From<&NetworkConfig> for FrameOptions {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            io_timeout: config.io_timeout(),
            idle_timeout: config.idle_timeout(),
            backoff: BackoffConfig {
                min_delay: config.backoff_min(),
                max_delay: config.backoff_max(),
                ..BackoffConfig::default()
            },
        }
    }
}

impl FrameOptions {
    /// Same limits, but a receive never waits longer than `io_timeout` for
    /// a frame to start. Used while a reply is expected, as in the
    /// handshake.
    pub fn awaiting_reply(&self) -> Self {
        let idle = match self.idle_timeout {
            Some(idle) => idle.min(self.io_timeout),
            None => self.io_timeout,
        };
        Self {
            idle_timeout: Some(idle),
            ..*self
        }
    }
}

/// Encode a complete frame (prefix and payload) into one buffer.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut bytes = varint::encode_to_vec(payload.len() as u64);
    bytes.extend_from_slice(payload);
    bytes
}

/// Write one frame and return the number of bytes put on the wire.
///
/// An empty payload is a no-op: nothing is written and `Ok(0)` is returned,
/// so callers must not assume a frame went out for empty input.
pub async fn send_frame<W>(
    writer: &mut W,
    payload: &[u8],
    opts: &FrameOptions,
) -> WireResult<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.is_empty() {
        return Ok(0);
    }

    let mut prefix = [0u8; MAX_VARINT_LEN];
    let prefix_len = varint::encode(payload.len() as u64, &mut prefix)?;

    with_deadline(opts.io_timeout, async {
        let mut backoff = Backoff::new(opts.backoff);
        write_fully(writer, &prefix[..prefix_len], &mut backoff).await?;
        write_fully(writer, payload, &mut backoff).await?;
        flush_fully(writer, &mut backoff).await?;
        trace!(len = payload.len(), "sent frame");
        Ok(prefix_len + payload.len())
    })
    .await
}

/// Write a zero-length frame (a single `0x00` byte).
///
/// [`send_frame`] never emits one for an empty payload; this is the
/// explicit way to tell an idle peer the connection is still alive.
pub async fn send_keep_alive<W>(writer: &mut W, opts: &FrameOptions) -> WireResult<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    with_deadline(opts.io_timeout, async {
        let mut backoff = Backoff::new(opts.backoff);
        write_fully(writer, &[0u8], &mut backoff).await?;
        flush_fully(writer, &mut backoff).await?;
        trace!("sent keep-alive");
        Ok(1)
    })
    .await
}

/// Read one frame and return its payload.
///
/// Fails with [`WireError::FrameTooLarge`] as soon as the declared length
/// exceeds `opts.max_frame_size`, and with [`WireError::ConnectionClosed`]
/// if the stream ends before the declared length has arrived. A truncated
/// payload is never returned.
pub async fn receive_frame<R>(reader: &mut R, opts: &FrameOptions) -> WireResult<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut backoff = Backoff::new(opts.backoff);
    let mut first = [0u8; 1];
    match opts.idle_timeout {
        Some(limit) => with_deadline(limit, read_fully(reader, &mut first, &mut backoff)).await?,
        None => read_fully(reader, &mut first, &mut backoff).await?,
    }

    with_deadline(opts.io_timeout, async {
        let declared = read_length(reader, first[0], &mut backoff).await?;
        if declared > opts.max_frame_size as u64 {
            return Err(WireError::FrameTooLarge {
                size: declared,
                max: opts.max_frame_size,
            });
        }

        let mut payload = vec![0u8; declared as usize];
        read_fully(reader, &mut payload, &mut backoff).await?;
        trace!(len = payload.len(), "received frame");
        Ok(payload)
    })
    .await
}

async fn with_deadline<T, F>(limit: Duration, fut: F) -> WireResult<T>
where
    F: Future<Output = WireResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(WireError::Timeout(limit)),
    }
}

/// Finish decoding a length prefix whose first byte was already read.
async fn read_length<R>(reader: &mut R, first: u8, backoff: &mut Backoff) -> WireResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut decoder = VarintDecoder::new();
    if let Some(len) = decoder.push(first)? {
        return Ok(len);
    }
    let mut byte = [0u8; 1];
    loop {
        read_fully(reader, &mut byte, backoff).await?;
        if let Some(len) = decoder.push(byte[0])? {
            return Ok(len);
        }
    }
}

async fn read_fully<R>(reader: &mut R, buf: &mut [u8], backoff: &mut Backoff) -> WireResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => return Err(WireError::ConnectionClosed),
            Ok(n) => {
                filled += n;
                backoff.reset();
            }
            Err(e) if is_transient(&e) => backoff.wait().await,
            Err(e) if is_closed(&e) => return Err(WireError::ConnectionClosed),
            Err(e) => return Err(WireError::Io(e)),
        }
    }
    Ok(())
}

async fn write_fully<W>(writer: &mut W, mut buf: &[u8], backoff: &mut Backoff) -> WireResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while !buf.is_empty() {
        match writer.write(buf).await {
            Ok(0) => {
                return Err(WireError::WriteFailed(io::Error::from(
                    io::ErrorKind::WriteZero,
                )))
            }
            Ok(n) => {
                buf = &buf[n..];
                backoff.reset();
            }
            Err(e) if is_transient(&e) => backoff.wait().await,
            Err(e) => return Err(WireError::WriteFailed(e)),
        }
    }
    Ok(())
}

async fn flush_fully<W>(writer: &mut W, backoff: &mut Backoff) -> WireResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match writer.flush().await {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) => backoff.wait().await,
            Err(e) => return Err(WireError::WriteFailed(e)),
        }
    }
}

fn is_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
