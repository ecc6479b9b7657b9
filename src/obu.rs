//! OBU (Open Bitstream Unit) header parsing and size-field normalization.
//! Reference: <https://aomediacodec.github.io/av1-spec/#obu-syntax>

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::leb128::{read_leb128_bytes, BytesMutExt};

pub const OBU_FORBIDDEN_BIT: u8 = 0b1000_0000;
pub const OBU_TYPE_MASK: u8 = 0b0111_1000;
pub const OBU_HAS_EXTENSION_BIT: u8 = 0b0000_0100;
pub const OBU_HAS_SIZE_BIT: u8 = 0b0000_0010;
pub const OBU_RESERVED_BIT: u8 = 0b0000_0001;

/// Hard cap on a single OBU's total on-wire size, enforced as the
/// `ObuTooLarge` error.
pub const MAX_OBU_SIZE: usize = 256_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObuType {
    SequenceHeader,
    TemporalDelimiter,
    FrameHeader,
    TileGroup,
    Metadata,
    Frame,
    RedundantFrameHeader,
    TileList,
    Padding,
    Reserved(u8),
}

impl ObuType {
    /// Types 1 (sequence header), 2 (temporal delimiter), 3 (frame header),
    /// 4 (tile group) and 6 (frame) MUST NOT be discarded by an intermediate
    /// relay; everything else may be dropped without corrupting decode.
    pub fn is_non_discardable(self) -> bool {
        matches!(
            self,
            ObuType::SequenceHeader
                | ObuType::TemporalDelimiter
                | ObuType::FrameHeader
                | ObuType::TileGroup
                | ObuType::Frame
        )
    }

    /// Should be stripped from a transmitted temporal unit. RFC 9628 notes
    /// tile-list OBUs SHOULD be removed before sending; temporal delimiters
    /// are re-synthesized canonically by the depayloader at TU emission.
    pub fn should_strip_on_emit(self) -> bool {
        matches!(self, ObuType::TemporalDelimiter | ObuType::TileList)
    }
}

impl From<u8> for ObuType {
    fn from(v: u8) -> Self {
        match v {
            1 => ObuType::SequenceHeader,
            2 => ObuType::TemporalDelimiter,
            3 => ObuType::FrameHeader,
            4 => ObuType::TileGroup,
            5 => ObuType::Metadata,
            6 => ObuType::Frame,
            7 => ObuType::RedundantFrameHeader,
            8 => ObuType::TileList,
            15 => ObuType::Padding,
            other => ObuType::Reserved(other),
        }
    }
}

impl From<ObuType> for u8 {
    fn from(t: ObuType) -> u8 {
        match t {
            ObuType::SequenceHeader => 1,
            ObuType::TemporalDelimiter => 2,
            ObuType::FrameHeader => 3,
            ObuType::TileGroup => 4,
            ObuType::Metadata => 5,
            ObuType::Frame => 6,
            ObuType::RedundantFrameHeader => 7,
            ObuType::TileList => 8,
            ObuType::Padding => 15,
            ObuType::Reserved(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObuExtension {
    pub temporal_id: u8,
    pub spatial_id: u8,
}

/// The parsed framing of a single OBU: where its header ends and its
/// payload begins, independent of where the OBU itself ends (that is
/// `total_size`, computed separately since it depends on whether a size
/// field is present).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObuHeaderInfo {
    pub obu_type: ObuType,
    pub has_size_field: bool,
    pub extension: Option<ObuExtension>,
    /// Length in bytes of the header (+ extension byte if present).
    pub header_len: usize,
}

/// Parses just the OBU header (and optional extension byte) at the start
/// of `data`. Does not look at or validate the size field / payload.
pub fn parse_header(data: &[u8]) -> Result<ObuHeaderInfo> {
    if data.is_empty() {
        return Err(Error::EmptyObuData);
    }
    let b = data[0];
    if b & OBU_FORBIDDEN_BIT != 0 {
        return Err(Error::ForbiddenBitSet);
    }
    if b & OBU_RESERVED_BIT != 0 {
        return Err(Error::MalformedHeader("obu header reserved bit set"));
    }
    let obu_type = ObuType::from((b & OBU_TYPE_MASK) >> 3);
    let has_extension = b & OBU_HAS_EXTENSION_BIT != 0;
    let has_size_field = b & OBU_HAS_SIZE_BIT != 0;

    let extension = if has_extension {
        let ext = *data
            .get(1)
            .ok_or(Error::ErrPayloadTooSmallForObuExtensionHeader)?;
        if ext & 0b0000_0111 != 0 {
            return Err(Error::InvalidExtensionReserved);
        }
        Some(ObuExtension {
            temporal_id: ext >> 5,
            spatial_id: (ext >> 3) & 0b11,
        })
    } else {
        None
    };

    Ok(ObuHeaderInfo {
        obu_type,
        has_size_field,
        extension,
        header_len: if has_extension { 2 } else { 1 },
    })
}

pub fn obu_type(header_byte: u8) -> ObuType {
    ObuType::from((header_byte & OBU_TYPE_MASK) >> 3)
}

pub fn obu_has_extension(header_byte: u8) -> bool {
    header_byte & OBU_HAS_EXTENSION_BIT != 0
}

pub fn obu_has_size(header_byte: u8) -> bool {
    header_byte & OBU_HAS_SIZE_BIT != 0
}

/// A fully framed OBU: header byte, optional extension byte, and payload.
/// `has_size_field` on `header` reflects the framing the OBU was parsed
/// from, not necessarily `true` — use `ensure_size_field` to normalize.
#[derive(Debug, Clone, PartialEq)]
pub struct Obu {
    pub header: u8,
    pub extension_header: Option<u8>,
    pub payload: Bytes,
}

impl Obu {
    pub fn obu_type(&self) -> ObuType {
        obu_type(self.header)
    }

    pub fn has_size_field(&self) -> bool {
        obu_has_size(self.header)
    }

    pub fn header_len(&self) -> usize {
        if self.extension_header.is_some() {
            2
        } else {
            1
        }
    }

    /// Total on-wire size if this OBU were serialized with its current
    /// `has_size_field` bit (header [+ extension] [+ leb128 size] + payload).
    pub fn total_size(&self) -> usize {
        let mut size = self.header_len() + self.payload.len();
        if self.has_size_field() {
            size += crate::leb128::leb128_size(self.payload.len() as u64);
        }
        size
    }

    /// Returns a copy of this OBU with `has_size_field` set and a correct
    /// LEB128 size written; idempotent if already set. Required so that
    /// concatenating several OBUs together preserves recoverable boundaries.
    pub fn ensure_size_field(&self) -> Obu {
        if self.has_size_field() {
            return self.clone();
        }
        Obu {
            header: self.header | OBU_HAS_SIZE_BIT,
            extension_header: self.extension_header,
            payload: self.payload.clone(),
        }
    }

    /// Returns a copy with `has_size_field` cleared (the on-wire form used
    /// inside RTP OBU elements, where the packet framing carries the
    /// length instead).
    pub fn without_size_field(&self) -> Obu {
        Obu {
            header: self.header & !OBU_HAS_SIZE_BIT,
            extension_header: self.extension_header,
            payload: self.payload.clone(),
        }
    }

    /// Serializes header [+ extension] [+ leb128 size if set] + payload.
    pub fn marshal(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.total_size());
        out.put_u8(self.header);
        if let Some(ext) = self.extension_header {
            out.put_u8(ext);
        }
        if self.has_size_field() {
            out.put_leb128(self.payload.len() as u64);
        }
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// Splits a stream of OBUs that each carry `has_size_field = 1` ("low
/// overhead" form — the common case for encoder output). On any parse
/// failure returns a single-element vec containing the *entire input* as
/// one opaque OBU-shaped element, signaling to the caller that the split
/// could not be trusted.
pub fn split_low_overhead(data: &Bytes) -> Vec<Obu> {
    match try_split_low_overhead(data) {
        Ok(obus) => obus,
        Err(_) => vec![opaque_obu(data)],
    }
}

fn try_split_low_overhead(data: &Bytes) -> Result<Vec<Obu>> {
    let mut obus = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let info = parse_header(&data[offset..])?;
        if !info.has_size_field {
            return Err(Error::MalformedHeader("expected has_size_field=1"));
        }
        let ext_byte = info
            .extension
            .map(|_| data[offset + 1]);
        let size_start = offset + info.header_len;
        let (leb_len, payload_len) = read_leb128_bytes(&data.slice(size_start..))?;
        let payload_start = size_start + leb_len;
        let payload_len = payload_len as usize;
        if data.len() < payload_start + payload_len {
            return Err(Error::IncompleteObu {
                expected: payload_start + payload_len,
                actual: data.len(),
            });
        }
        obus.push(Obu {
            header: data[offset],
            extension_header: ext_byte,
            payload: data.slice(payload_start..payload_start + payload_len),
        });
        offset = payload_start + payload_len;
    }
    Ok(obus)
}

/// Splits an LEB128-length-delimited OBU stream ("Annex-B-ish" framing:
/// each OBU's header has `has_size_field = 0` and is instead preceded by
/// an outer LEB128 length covering header+payload). Falls back to a
/// single opaque element on any parse failure, same contract as
/// [`split_low_overhead`].
pub fn split_length_prefixed(data: &Bytes) -> Vec<Obu> {
    match try_split_length_prefixed(data) {
        Ok(obus) => obus,
        Err(_) => vec![opaque_obu(data)],
    }
}

fn try_split_length_prefixed(data: &Bytes) -> Result<Vec<Obu>> {
    let mut obus = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let (leb_len, obu_len) = read_leb128_bytes(&data.slice(offset..))?;
        let obu_start = offset + leb_len;
        let obu_len = obu_len as usize;
        if obu_len == 0 {
            return Err(Error::ZeroLengthObu);
        }
        if data.len() < obu_start + obu_len {
            return Err(Error::IncompleteObu {
                expected: obu_start + obu_len,
                actual: data.len(),
            });
        }
        let obu_bytes = data.slice(obu_start..obu_start + obu_len);
        let info = parse_header(&obu_bytes)?;
        let ext_byte = info.extension.map(|_| obu_bytes[1]);
        let payload = if info.has_size_field {
            let (inner_leb_len, inner_payload_len) =
                read_leb128_bytes(&obu_bytes.slice(info.header_len..))?;
            let payload_start = info.header_len + inner_leb_len;
            obu_bytes.slice(payload_start..payload_start + inner_payload_len as usize)
        } else {
            obu_bytes.slice(info.header_len..)
        };
        obus.push(Obu {
            header: obu_bytes[0],
            extension_header: ext_byte,
            payload,
        });
        offset = obu_start + obu_len;
    }
    Ok(obus)
}

/// Which framing a caller's AV1 access unit uses, determined by a single
/// deterministic rule: the `has_size_field` bit of the *first* byte.
pub fn detect_framing(data: &Bytes) -> ObuFraming {
    if data.is_empty() {
        return ObuFraming::LowOverhead;
    }
    if obu_has_size(data[0]) {
        ObuFraming::LowOverhead
    } else {
        ObuFraming::LengthPrefixed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObuFraming {
    LowOverhead,
    LengthPrefixed,
}

/// An OBU-shaped wrapper around bytes this crate couldn't parse; carries
/// the whole input as its "payload" with a sequence-header-shaped header
/// byte so downstream naive fragmentation still has *something* framed.
/// Never produced except as the error fallback of the split functions.
fn opaque_obu(data: &Bytes) -> Obu {
    Obu {
        header: 0,
        extension_header: None,
        payload: data.clone(),
    }
}
