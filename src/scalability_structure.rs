//! Scalability Structure (SS): out-of-band description of spatial/temporal
//! layering, carried in the FMTP `ss-data` parameter (see `fmtp.rs`) or
//! in-band on AV1 keyframes as an OBU metadata payload — this module only
//! concerns itself with the byte layout, not where the bytes travel.
//!
//! Layout:
//!   byte 0:            N_S(3) | Y(1) | N_G(4)
//!   N_S+1 descriptors:  width/16 (u16), height/16 (u16) [, framerate/16 (u16) if Y=0]
//!   N_G descriptors:    T(3) | U(2) | R(2) | reserved(1), then N_S+1 P_DIFF bytes
//!
//! Modeled after the bit-twiddling style of VP9's SS parser (`parse_ssdata`
//! in the pack's vp9 codec), generalized to AV1's per-layer width/height/
//! framerate fields and AV1's fixed (always N_S+1) P_DIFF count.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

use crate::error::{Error, Result};

pub const MAX_SCALABILITY_STRUCTURE_SIZE: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialLayerDescriptor {
    pub width: u16,
    pub height: u16,
    /// Present iff the structure's `y` flag is false.
    pub framerate: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureDescriptor {
    pub temporal_id: u8,
    /// Switching-up point, 2 bits.
    pub u: u8,
    /// 2-bit field, meaning left to the host's layering policy.
    pub r: u8,
    /// Always exactly `spatial_layers.len()` entries.
    pub p_diffs: SmallVec<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalabilityStructure {
    /// `y == false` means every spatial layer descriptor carries a framerate.
    pub y: bool,
    pub spatial_layers: SmallVec<[SpatialLayerDescriptor; 4]>,
    pub pictures: SmallVec<[PictureDescriptor; 8]>,
}

impl ScalabilityStructure {
    fn n_s(&self) -> Result<u8> {
        let n_s = self
            .spatial_layers
            .len()
            .checked_sub(1)
            .ok_or(Error::InvalidNs)?;
        if n_s > 0b111 {
            return Err(Error::InvalidNs);
        }
        Ok(n_s as u8)
    }

    fn n_g(&self) -> Result<u8> {
        if self.pictures.len() > 0b1111 {
            return Err(Error::InvalidNg);
        }
        Ok(self.pictures.len() as u8)
    }

    pub fn encoded_len(&self) -> usize {
        let per_layer = if self.y { 4 } else { 6 };
        let spatial_bytes = self.spatial_layers.len() * per_layer;
        let picture_bytes: usize = self.pictures.iter().map(|p| 1 + p.p_diffs.len()).sum();
        1 + spatial_bytes + picture_bytes
    }

    pub fn encode(&self) -> Result<Bytes> {
        let n_s = self.n_s()?;
        let n_g = self.n_g()?;
        for layer in &self.spatial_layers {
            if layer.width == 0 || layer.height == 0 {
                return Err(Error::IncompleteSpatialLayers);
            }
        }
        for p in &self.pictures {
            if p.p_diffs.len() != self.spatial_layers.len() {
                return Err(Error::SpatialLayerCountMismatch);
            }
        }

        let len = self.encoded_len();
        if len > MAX_SCALABILITY_STRUCTURE_SIZE {
            return Err(Error::ScalabilityStructureTooLarge);
        }
        let mut out = BytesMut::with_capacity(len);
        out.put_u8((n_s << 5) | ((self.y as u8) << 4) | (n_g & 0b1111));
        for layer in &self.spatial_layers {
            out.put_u16(layer.width);
            out.put_u16(layer.height);
            if !self.y {
                out.put_u16(layer.framerate.unwrap_or(0));
            }
        }
        for picture in &self.pictures {
            out.put_u8((picture.temporal_id << 5) | ((picture.u & 0b11) << 3) | ((picture.r & 0b11) << 1));
            for &p_diff in &picture.p_diffs {
                out.put_u8(p_diff);
            }
        }
        Ok(out.freeze())
    }

    pub fn decode(data: &Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::IncompleteSpatialLayers);
        }
        let mut reader = data.clone();
        let b0 = reader.get_u8();
        let n_s = b0 >> 5;
        let y = (b0 >> 4) & 1 != 0;
        let n_g = b0 & 0b1111;

        let layer_count = n_s as usize + 1;
        let per_layer = if y { 4 } else { 6 };
        if reader.remaining() < layer_count * per_layer {
            return Err(Error::IncompleteSpatialLayers);
        }
        let mut spatial_layers = SmallVec::new();
        for _ in 0..layer_count {
            let width = reader.get_u16();
            let height = reader.get_u16();
            if width == 0 || height == 0 {
                return Err(Error::IncompleteSpatialLayers);
            }
            let framerate = if y { None } else { Some(reader.get_u16()) };
            spatial_layers.push(SpatialLayerDescriptor {
                width,
                height,
                framerate,
            });
        }

        let mut pictures = SmallVec::new();
        for _ in 0..n_g {
            if reader.remaining() == 0 {
                return Err(Error::IncompletePictureDescriptors);
            }
            let b = reader.get_u8();
            if b & 0b1 != 0 {
                return Err(Error::IncompletePictureDescriptors);
            }
            let temporal_id = b >> 5;
            let u = (b >> 3) & 0b11;
            let r = (b >> 1) & 0b11;
            if reader.remaining() < layer_count {
                return Err(Error::IncompletePictureDescriptors);
            }
            let mut p_diffs = SmallVec::new();
            for _ in 0..layer_count {
                p_diffs.push(reader.get_u8());
            }
            pictures.push(PictureDescriptor {
                temporal_id,
                u,
                r,
                p_diffs,
            });
        }

        let structure = ScalabilityStructure {
            y,
            spatial_layers,
            pictures,
        };
        if structure.encoded_len() > MAX_SCALABILITY_STRUCTURE_SIZE {
            return Err(Error::ScalabilityStructureTooLarge);
        }
        Ok(structure)
    }
}

#[cfg(test)]
mod scalability_structure_test {
    use super::*;

    fn layer(w: u16, h: u16, fr: Option<u16>) -> SpatialLayerDescriptor {
        SpatialLayerDescriptor {
            width: w,
            height: h,
            framerate: fr,
        }
    }

    #[test]
    fn round_trips_with_framerate() {
        let ss = ScalabilityStructure {
            y: false,
            spatial_layers: SmallVec::from_vec(vec![layer(320, 180, Some(30)), layer(640, 360, Some(30))]),
            pictures: SmallVec::from_vec(vec![PictureDescriptor {
                temporal_id: 1,
                u: 2,
                r: 1,
                p_diffs: SmallVec::from_vec(vec![1, 2]),
            }]),
        };
        let encoded = ss.encode().unwrap();
        assert!(encoded.len() <= MAX_SCALABILITY_STRUCTURE_SIZE);
        let decoded = ScalabilityStructure::decode(&encoded).unwrap();
        assert_eq!(ss, decoded);
    }

    #[test]
    fn round_trips_without_framerate() {
        let ss = ScalabilityStructure {
            y: true,
            spatial_layers: SmallVec::from_vec(vec![layer(160, 90, None)]),
            pictures: SmallVec::from_vec(vec![]),
        };
        let encoded = ss.encode().unwrap();
        let decoded = ScalabilityStructure::decode(&encoded).unwrap();
        assert_eq!(ss, decoded);
    }

    #[test]
    fn rejects_picture_with_mismatched_p_diff_count() {
        let ss = ScalabilityStructure {
            y: true,
            spatial_layers: SmallVec::from_vec(vec![layer(1, 1, None), layer(2, 2, None)]),
            pictures: SmallVec::from_vec(vec![PictureDescriptor {
                temporal_id: 0,
                u: 0,
                r: 1,
                p_diffs: SmallVec::from_vec(vec![1]),
            }]),
        };
        assert_eq!(ss.encode().unwrap_err(), Error::SpatialLayerCountMismatch);
    }

    #[test]
    fn rejects_truncated_spatial_layers() {
        let truncated = Bytes::from_static(&[0b0000_0000, 0x01]);
        assert_eq!(
            ScalabilityStructure::decode(&truncated).unwrap_err(),
            Error::IncompleteSpatialLayers
        );
    }

    #[test]
    fn largest_legal_structure_still_fits_under_the_cap() {
        // N_S and N_G are 3- and 4-bit fields, so the largest structure
        // the wire format can even express (8 spatial layers, 15 pictures)
        // comes nowhere near MAX_SCALABILITY_STRUCTURE_SIZE; the cap exists
        // as a safety net, not a reachable error in ordinary use.
        let spatial_layers: SmallVec<[SpatialLayerDescriptor; 4]> =
            (0..8).map(|_| layer(64, 64, None)).collect();
        let pictures: SmallVec<[PictureDescriptor; 8]> = (0..15)
            .map(|_| PictureDescriptor {
                temporal_id: 0,
                u: 0,
                r: 0,
                p_diffs: (0..8u8).collect(),
            })
            .collect();
        let ss = ScalabilityStructure {
            y: false,
            spatial_layers,
            pictures,
        };
        let encoded = ss.encode().unwrap();
        assert!(encoded.len() <= MAX_SCALABILITY_STRUCTURE_SIZE);
        assert_eq!(ScalabilityStructure::decode(&encoded).unwrap(), ss);
    }

    #[test]
    fn ninth_spatial_layer_is_rejected_before_the_size_cap_matters() {
        let spatial_layers: SmallVec<[SpatialLayerDescriptor; 4]> =
            (0..9).map(|_| layer(64, 64, None)).collect();
        let ss = ScalabilityStructure {
            y: false,
            spatial_layers,
            pictures: SmallVec::new(),
        };
        assert_eq!(ss.encode().unwrap_err(), Error::InvalidNs);
    }
}
