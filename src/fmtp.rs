//! SDP `a=fmtp` parameter model for AV1 (payload type negotiation only;
//! text assembly beyond the fmtp line itself is left to the host's SDP
//! stack, per this crate's non-goals).
//!
//! Parsing style (semicolon-separated `key=value`, case-insensitive keys,
//! whitespace-tolerant) mirrors this workspace's other `fmtp` parameter
//! parsers, generalized from a bag-of-strings into a typed, validated
//! record.

use std::collections::HashMap;
use std::fmt::Write as _;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::scalability_structure::ScalabilityStructure;

/// `(level_idx, level_string)` pairs this crate recognizes. Indices not
/// listed here are reserved by the AV1 spec and have no level string.
const LEVEL_TABLE: &[(u8, &str)] = &[
    (0, "2.0"),
    (1, "2.1"),
    (4, "3.0"),
    (5, "3.1"),
    (8, "4.0"),
    (9, "4.1"),
    (12, "5.0"),
    (13, "5.1"),
    (14, "5.2"),
    (15, "5.3"),
    (16, "6.0"),
    (17, "6.1"),
    (18, "6.2"),
    (19, "6.3"),
    (20, "7.0"),
    (21, "7.1"),
    (22, "7.2"),
    (23, "7.3"),
];

pub fn level_idx_to_string(idx: u8) -> Option<&'static str> {
    LEVEL_TABLE
        .iter()
        .find(|(i, _)| *i == idx)
        .map(|(_, s)| *s)
}

pub fn level_string_to_idx(s: &str) -> Option<u8> {
    LEVEL_TABLE.iter().find(|(_, v)| *v == s).map(|(i, _)| *i)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fmtp {
    pub profile: Option<u8>,
    pub level_idx: Option<u8>,
    pub tier: Option<u8>,
    pub cm: Option<u8>,
    pub temporal_id: Option<u8>,
    pub spatial_id: Option<u8>,
    pub ss_data: Option<Bytes>,
}

impl Fmtp {
    /// Parses a raw `a=fmtp` parameter string (without the `a=fmtp:<pt> `
    /// prefix), accepting both canonical and alias keys.
    pub fn parse(line: &str) -> Result<Fmtp> {
        let mut raw: HashMap<String, String> = HashMap::new();
        for part in line.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut kv = part.splitn(2, '=');
            let key = kv.next().unwrap_or("").trim().to_lowercase();
            let value = kv.next().unwrap_or("").trim().to_string();
            raw.insert(key, value);
        }

        let parse_u8 = |keys: &[&str], raw: &HashMap<String, String>| -> Result<Option<u8>> {
            for key in keys {
                if let Some(v) = raw.get(*key) {
                    return v
                        .parse::<u8>()
                        .map(Some)
                        .map_err(|_| Error::FmtpInvalidInteger(v.clone()));
                }
            }
            Ok(None)
        };

        let profile = parse_u8(&["profile", "profile-id"], &raw)?;
        let level_idx = parse_u8(&["level-idx", "level_idx"], &raw)?;
        let tier = parse_u8(&["tier"], &raw)?;
        let cm = parse_u8(&["cm"], &raw)?;
        let temporal_id = parse_u8(&["tid", "temporal_id"], &raw)?;
        let spatial_id = parse_u8(&["lid", "spatial_id"], &raw)?;

        let ss_data = match raw.get("ss-data") {
            Some(hex) => Some(decode_hex(hex)?),
            None => None,
        };

        if let Some(idx) = level_idx {
            if level_idx_to_string(idx).is_none() {
                return Err(Error::FmtpUnknownLevelIndex(idx));
            }
        }

        let fmtp = Fmtp {
            profile,
            level_idx,
            tier,
            cm,
            temporal_id,
            spatial_id,
            ss_data,
        };
        fmtp.validate()?;
        Ok(fmtp)
    }

    fn validate(&self) -> Result<()> {
        // profile 0 (Main) does not define a high tier.
        if self.profile == Some(0) && self.tier == Some(1) {
            return Err(Error::FmtpInvalidProfileTier);
        }
        Ok(())
    }

    /// Decodes the `ss-data` hex blob, if present, into a typed structure.
    pub fn scalability_structure(&self) -> Result<Option<ScalabilityStructure>> {
        match &self.ss_data {
            Some(bytes) => Ok(Some(ScalabilityStructure::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Renders the `a=fmtp:<pt> ...` parameter portion (without the leading
    /// `a=fmtp:<pt> `, matching `Fmtp::parse`'s input contract).
    pub fn to_sdp_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(p) = self.profile {
            parts.push(format!("profile={p}"));
        }
        if let Some(idx) = self.level_idx {
            parts.push(format!("level-idx={idx}"));
        }
        if let Some(t) = self.tier {
            parts.push(format!("tier={t}"));
        }
        if let Some(cm) = self.cm {
            parts.push(format!("cm={cm}"));
        }
        if let Some(tid) = self.temporal_id {
            parts.push(format!("tid={tid}"));
        }
        if let Some(lid) = self.spatial_id {
            parts.push(format!("lid={lid}"));
        }
        if let Some(ss) = &self.ss_data {
            parts.push(format!("ss-data={}", encode_hex(ss)));
        }
        parts.join(";")
    }

    /// Checks two FMTP records for SDP-offer/answer consistency: keys
    /// present in both must agree, missing keys on either side are fine.
    pub fn consist(&self, other: &Fmtp) -> bool {
        let eq = |a: Option<u8>, b: Option<u8>| a.is_none() || b.is_none() || a == b;
        eq(self.profile, other.profile)
            && eq(self.level_idx, other.level_idx)
            && eq(self.tier, other.tier)
            && eq(self.cm, other.cm)
            && eq(self.temporal_id, other.temporal_id)
            && eq(self.spatial_id, other.spatial_id)
    }
}

/// Emits the `a=rtpmap:<pt> AV1/90000` value half (everything after
/// `a=rtpmap:`).
pub fn rtpmap_line(payload_type: u8) -> String {
    format!("{payload_type} AV1/90000")
}

fn encode_hex(data: &Bytes) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data.as_ref() {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn decode_hex(s: &str) -> Result<Bytes> {
    if s.len() % 2 != 0 {
        return Err(Error::FmtpInvalidSsData);
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = (chunk[0] as char).to_digit(16).ok_or(Error::FmtpInvalidSsData)?;
        let lo = (chunk[1] as char).to_digit(16).ok_or(Error::FmtpInvalidSsData)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(Bytes::from(out))
}
