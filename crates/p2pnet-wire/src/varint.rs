//! Unsigned base-128 varints.
//!
//! Each byte carries 7 bits of the value, least-significant group first. The
//! high bit of every byte except the last is set to signal continuation.
//! Values are limited to 64 bits, so an encoding is at most
//! [`MAX_VARINT_LEN`] bytes long.

use thiserror::Error;

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const PAYLOAD: u8 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintError {
    /// Input ended while the continuation bit was still set.
    #[error("malformed varint: input ended before the terminating byte")]
    Malformed,
    /// The value does not fit in 64 bits.
    #[error("varint overflows 64 bits")]
    Overflow,
    #[error("buffer too small for varint: need {needed} bytes, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Encode `value` into the front of `buf`, returning the number of bytes
/// written. Fails without touching `buf` if it is too short.
pub fn encode(value: u64, buf: &mut [u8]) -> Result<usize, VarintError> {
    let needed = encoded_len(value);
    if buf.len() < needed {
        return Err(VarintError::BufferTooSmall {
            needed,
            capacity: buf.len(),
        });
    }

    let mut rest = value;
    for slot in buf.iter_mut().take(needed - 1) {
        *slot = (rest as u8 & PAYLOAD) | CONTINUATION;
        rest >>= 7;
    }
    buf[needed - 1] = rest as u8;
    Ok(needed)
}

pub fn encode_to_vec(value: u64) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    // A u64 always fits in MAX_VARINT_LEN bytes.
    let len = encode(value, &mut buf).unwrap_or(MAX_VARINT_LEN);
    buf[..len].to_vec()
}

/// Decode a varint from the front of `bytes`.
///
/// Returns the value and how many bytes it occupied; trailing bytes are left
/// alone.
pub fn decode(bytes: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut decoder = VarintDecoder::new();
    for (i, byte) in bytes.iter().enumerate() {
        if let Some(value) = decoder.push(*byte)? {
            return Ok((value, i + 1));
        }
    }
    Err(VarintError::Malformed)
}

/// Incremental decoder for input that arrives one byte at a time.
#[derive(Debug, Default, Clone)]
pub struct VarintDecoder {
    value: u64,
    shift: u32,
    consumed: usize,
}

impl VarintDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next byte. Returns `Some(value)` once the terminating byte
    /// has been seen.
    pub fn push(&mut self, byte: u8) -> Result<Option<u64>, VarintError> {
        if self.consumed >= MAX_VARINT_LEN {
            return Err(VarintError::Overflow);
        }
        let group = u64::from(byte & PAYLOAD);
        // The tenth byte may only contribute the single remaining bit.
        if self.shift == 63 && group > 1 {
            return Err(VarintError::Overflow);
        }

        self.value |= group << self.shift;
        self.consumed += 1;

        if byte & CONTINUATION == 0 {
            return Ok(Some(self.value));
        }
        self.shift += 7;
        Ok(None)
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}
