//! Classifies OBUs within an access unit and partitions it into temporal
//! units, driving both the payloader's `N`-bit and marker-bit placement
//! and the depayloader's keyframe/sequence-header gating.

use crate::obu::{Obu, ObuType};

/// One logical decoding moment: a contiguous run of OBUs bounded by a
/// temporal delimiter or a fresh sequence header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalUnitSpan {
    /// Index of the first OBU (inclusive) in the access unit's OBU list.
    pub start: usize,
    /// Index one past the last OBU in this span.
    pub end: usize,
    pub has_sequence_header: bool,
    pub has_frame: bool,
    pub is_keyframe: bool,
}

/// Per-AU classification summary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessUnitInfo {
    pub starts_new_coded_video_sequence: bool,
    pub temporal_units: Vec<TemporalUnitSpan>,
}

/// `frame_type=0` and `show_existing_frame=0` in the first bits of a frame
/// or frame-header OBU's payload mark a keyframe. AV1 frame headers start
/// with `show_existing_frame(1)`, then (if 0) `frame_type(2)`.
pub(crate) fn is_keyframe_payload(payload: &[u8]) -> bool {
    let Some(&first) = payload.first() else {
        return false;
    };
    let show_existing_frame = (first & 0b1000_0000) != 0;
    if show_existing_frame {
        return false;
    }
    let frame_type = (first >> 5) & 0b11;
    frame_type == 0
}

/// Classifies an access unit's OBUs: a new coded video sequence is
/// declared whenever any sequence header OBU is present (regardless of
/// frame type), and TU boundaries fall at every temporal delimiter or
/// fresh sequence header.
pub fn classify(obus: &[Obu]) -> AccessUnitInfo {
    let starts_new_coded_video_sequence = obus
        .iter()
        .any(|o| o.obu_type() == ObuType::SequenceHeader);

    let mut spans = Vec::new();
    let mut current_start = 0usize;

    for (i, obu) in obus.iter().enumerate() {
        let is_boundary_start = matches!(
            obu.obu_type(),
            ObuType::TemporalDelimiter | ObuType::SequenceHeader
        );
        if is_boundary_start && i != current_start && i > current_start {
            spans.push(summarize(obus, current_start, i));
            current_start = i;
        }
    }
    if current_start < obus.len() {
        spans.push(summarize(obus, current_start, obus.len()));
    }

    AccessUnitInfo {
        starts_new_coded_video_sequence,
        temporal_units: spans,
    }
}

fn summarize(obus: &[Obu], start: usize, end: usize) -> TemporalUnitSpan {
    let mut has_sequence_header = false;
    let mut has_frame = false;
    let mut is_keyframe = false;
    for obu in &obus[start..end] {
        match obu.obu_type() {
            ObuType::SequenceHeader => has_sequence_header = true,
            ObuType::Frame | ObuType::FrameHeader => {
                has_frame = true;
                if is_keyframe_payload(&obu.payload) {
                    is_keyframe = true;
                }
            }
            _ => {}
        }
    }
    TemporalUnitSpan {
        start,
        end,
        has_sequence_header,
        has_frame,
        is_keyframe,
    }
}

#[cfg(test)]
mod temporal_unit_test {
    use super::*;
    use bytes::Bytes;

    fn obu(obu_type: ObuType, payload: &[u8]) -> Obu {
        Obu {
            header: (u8::from(obu_type)) << 3,
            extension_header: None,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn single_tu_without_sequence_header() {
        let obus = vec![
            obu(ObuType::TemporalDelimiter, &[]),
            obu(ObuType::Frame, &[0b0000_0000]),
        ];
        let info = classify(&obus);
        assert!(!info.starts_new_coded_video_sequence);
        assert_eq!(info.temporal_units.len(), 1);
        assert!(info.temporal_units[0].has_frame);
        assert!(info.temporal_units[0].is_keyframe);
    }

    #[test]
    fn sequence_header_marks_new_coded_video_sequence() {
        let obus = vec![
            obu(ObuType::SequenceHeader, &[0xaa]),
            obu(ObuType::TemporalDelimiter, &[]),
            obu(ObuType::Frame, &[0b0000_0000]),
        ];
        let info = classify(&obus);
        assert!(info.starts_new_coded_video_sequence);
    }

    #[test]
    fn non_keyframe_detected_from_frame_type() {
        // show_existing_frame=0, frame_type=1 (inter frame).
        let obus = vec![obu(ObuType::Frame, &[0b0010_0000])];
        let info = classify(&obus);
        assert!(!info.temporal_units[0].is_keyframe);
    }

    #[test]
    fn show_existing_frame_is_never_a_keyframe() {
        let obus = vec![obu(ObuType::Frame, &[0b1000_0000])];
        let info = classify(&obus);
        assert!(!info.temporal_units[0].is_keyframe);
    }

    #[test]
    fn multiple_sequence_headers_split_into_separate_tus() {
        let obus = vec![
            obu(ObuType::SequenceHeader, &[0xaa]),
            obu(ObuType::Frame, &[0b0000_0000]),
            obu(ObuType::SequenceHeader, &[0xaa]),
            obu(ObuType::Frame, &[0b0000_0000]),
        ];
        let info = classify(&obus);
        assert_eq!(info.temporal_units.len(), 2);
        assert_eq!(info.temporal_units[0].start, 0);
        assert_eq!(info.temporal_units[0].end, 2);
        assert_eq!(info.temporal_units[1].start, 2);
        assert_eq!(info.temporal_units[1].end, 4);
    }
}
