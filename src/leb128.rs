//! Unsigned LEB128 coding used throughout the AV1 bitstream and the RTP
//! aggregation header's OBU-element length prefixes.
//! Reference: <https://aomediacodec.github.io/av1-spec/#leb128>

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Canonical form never needs more than 8 bytes for the values this crate
/// cares about (OBU sizes fit comfortably in a u64); reject anything longer
/// so a corrupt stream can't make us loop forever.
pub const MAX_LEB128_BYTES: usize = 8;

/// Encodes `val` as a canonical (minimal-length) LEB128 byte sequence.
pub fn encode_leb128(mut val: u64) -> BytesMut {
    let mut out = BytesMut::with_capacity(2);
    loop {
        let mut byte = (val & 0b0111_1111) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0b1000_0000;
            out.put_u8(byte);
        } else {
            out.put_u8(byte);
            break;
        }
    }
    out
}

/// Number of bytes `encode_leb128(value)` would produce.
pub fn leb128_size(value: u64) -> usize {
    let mut size = 1;
    let mut value = value >> 7;
    while value != 0 {
        size += 1;
        value >>= 7;
    }
    size
}

/// Reads a LEB128 value from the front of `bytes`. Returns `(byte_count,
/// value)` on success. Fails with `Leb128Truncated` if the continuation bit
/// is still set at the end of `bytes`, and `Leb128TooLong` if more than
/// [`MAX_LEB128_BYTES`] bytes would be needed (this also bounds the loop so
/// malformed input can't spin forever).
pub fn read_leb128(bytes: &[u8]) -> Result<(usize, u64)> {
    let mut value: u64 = 0;
    for (i, &b) in bytes.iter().take(MAX_LEB128_BYTES).enumerate() {
        value |= ((b & 0b0111_1111) as u64) << (7 * i);
        if b & 0b1000_0000 == 0 {
            return Ok((i + 1, value));
        }
    }
    if bytes.len() < MAX_LEB128_BYTES {
        Err(Error::Leb128Truncated)
    } else {
        Err(Error::Leb128TooLong)
    }
}

pub trait BytesMutExt {
    fn put_leb128(&mut self, n: u64);
}

impl BytesMutExt for BytesMut {
    fn put_leb128(&mut self, n: u64) {
        self.put_slice(&encode_leb128(n));
    }
}

/// Convenience wrapper for call sites that already hold a `Bytes` slice.
pub fn read_leb128_bytes(bytes: &Bytes) -> Result<(usize, u64)> {
    read_leb128(bytes.as_ref())
}
