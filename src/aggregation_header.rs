//! The 1-byte RTP aggregation header.
//! Reference: <https://aomediacodec.github.io/av1-rtp-spec/#44-av1-aggregation-header>
//!
//! Byte layout: `Z Y W W N - - -`. Bits 2..0 are reserved and MUST be zero
//! on decode.
//!
//! The source this crate is descended from carried two mutually
//! incompatible readings of bit 7: the RFC 9628 meaning used here ("first
//! OBU element continues a fragment from the previous packet") and a
//! legacy reading where it doubled as an SS-present flag gating an IDS
//! byte and an inline Scalability Structure block. This crate implements
//! the RFC meaning exclusively and carries no in-band extension bytes;
//! Scalability Structure transport goes through the FMTP `ss-data`
//! parameter (see `fmtp.rs`) instead. See DESIGN.md for the full
//! rationale.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

pub const AGGREGATION_HEADER_SIZE: usize = 1;

const Z_BIT: u8 = 0b1000_0000;
const Y_BIT: u8 = 0b0100_0000;
const W_SHIFT: u8 = 4;
const W_MASK: u8 = 0b0011_0000;
const N_BIT: u8 = 0b0000_1000;
const RESERVED_MASK: u8 = 0b0000_0111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationHeader {
    /// First OBU element in this packet continues a fragment begun in a
    /// previous packet.
    pub z: bool,
    /// Last OBU element in this packet continues in the next packet.
    pub y: bool,
    /// Number of OBU elements in this packet: 0 means "all length-prefixed",
    /// 1..=3 means that many elements, the last one unprefixed.
    pub w: u8,
    /// First packet of a new coded video sequence.
    pub n: bool,
}

impl AggregationHeader {
    pub fn new(z: bool, y: bool, w: u8, n: bool) -> Self {
        AggregationHeader { z, y, w, n }
    }

    pub fn encode(&self) -> Result<Bytes> {
        if self.w > 3 {
            return Err(Error::InvalidW);
        }
        let mut out = BytesMut::with_capacity(AGGREGATION_HEADER_SIZE);
        let mut byte = 0u8;
        if self.z {
            byte |= Z_BIT;
        }
        if self.y {
            byte |= Y_BIT;
        }
        byte |= (self.w << W_SHIFT) & W_MASK;
        if self.n {
            byte |= N_BIT;
        }
        out.put_u8(byte);
        Ok(out.freeze())
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        let byte = *data.first().ok_or(Error::MtuTooSmall)?;
        if byte & RESERVED_MASK != 0 {
            return Err(Error::InvalidAggregationHeaderReserved);
        }
        let w = (byte & W_MASK) >> W_SHIFT;
        if w > 3 {
            return Err(Error::InvalidW);
        }
        Ok(AggregationHeader {
            z: byte & Z_BIT != 0,
            y: byte & Y_BIT != 0,
            w,
            n: byte & N_BIT != 0,
        })
    }
}
