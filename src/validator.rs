//! Structural validation of an access unit's OBU framing, independent of
//! whether the caller intends to trust the encoder or not.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::leb128::read_leb128_bytes;
use crate::obu::{obu_has_extension, obu_has_size, parse_header, MAX_OBU_SIZE, OBU_FORBIDDEN_BIT};

/// Walks `data` as a low-overhead (`has_size_field=1`) OBU stream and
/// validates every OBU boundary without constructing the `Obu` list. Used
/// ahead of any destructive rewrite (size-field normalization,
/// fragmentation) so a truncated trailing OBU is reported as
/// `PartialObuAtBoundary`, distinct from ordinary malformed input.
pub fn validate_low_overhead(data: &Bytes) -> Result<()> {
    let mut offset = 0usize;
    while offset < data.len() {
        let remaining = data.len() - offset;
        let first = data[offset];
        if first & OBU_FORBIDDEN_BIT != 0 {
            return Err(Error::ForbiddenBitSet);
        }

        let info = match parse_header(&data[offset..]) {
            Ok(info) => info,
            Err(_) if remaining <= 2 => {
                return Err(Error::PartialObuAtBoundary { size: remaining });
            }
            Err(e) => return Err(e),
        };
        if !info.has_size_field {
            return Err(Error::MalformedHeader(
                "access unit validation requires has_size_field=1 OBUs",
            ));
        }

        let size_start = offset + info.header_len;
        if size_start >= data.len() {
            return Err(Error::PartialObuAtBoundary { size: remaining });
        }
        let (leb_len, payload_len) = match read_leb128_bytes(&data.slice(size_start..)) {
            Ok(v) => v,
            Err(_) => return Err(Error::PartialObuAtBoundary { size: remaining }),
        };
        let payload_len = payload_len as usize;
        if payload_len == 0 && info.header_len + leb_len == remaining {
            return Err(Error::ZeroLengthObu);
        }

        let total = info.header_len + leb_len + payload_len;
        if total > MAX_OBU_SIZE {
            return Err(Error::ObuTooLarge {
                size: total,
                max: MAX_OBU_SIZE,
            });
        }
        let obu_end = size_start + leb_len + payload_len;
        if obu_end > data.len() {
            // Declared payload runs past the end of the access unit: the
            // OBU was cut off at the boundary rather than corrupted mid-stream.
            return Err(Error::PartialObuAtBoundary { size: remaining });
        }

        offset = obu_end;
    }
    Ok(())
}

/// Sanity-checks a single already-framed OBU header without needing the
/// rest of the access unit around it (used by the depayloader once a
/// fragment has been reassembled).
pub fn validate_obu_header(header: u8, has_following_extension_byte: bool) -> Result<()> {
    if header & OBU_FORBIDDEN_BIT != 0 {
        return Err(Error::ForbiddenBitSet);
    }
    if obu_has_extension(header) && !has_following_extension_byte {
        return Err(Error::ErrPayloadTooSmallForObuExtensionHeader);
    }
    let _ = obu_has_size(header);
    Ok(())
}
