//! Stateful reassembly of AV1 RTP packets back into temporal units.
//!
//! The per-packet OBU-element extraction walks an aggregation header's
//! Z/Y/W fields to pull elements out of a single packet, stripping
//! temporal delimiters and tile lists on the way out. Built on top of
//! that: sequence-number gap handling, per-fragment timeouts,
//! sequence-header caching, and keyframe gating, for a feed that can
//! reorder, drop, and duplicate packets rather than assuming a
//! lossless, already-ordered one.

use bytes::{Bytes, BytesMut};

use crate::config::DepayloaderConfig;
use crate::error::{Error, Result};
use crate::event::{Counters, DepayloadEvent};
use crate::leb128::read_leb128;
use crate::obu::{parse_header, Obu, ObuType};
use crate::reorder::{ReorderBuffer, DEFAULT_REORDER_TIMEOUT};
use crate::sequence::{wrapping_diff, FragmentEdge, SequenceOutcome, SequenceTracker, WState, WTransition};
use crate::temporal_unit::is_keyframe_payload;

/// Canonical temporal delimiter: header byte (type 2, no extension, has
/// size field) + LEB128 size 0. Prepended to every emitted temporal unit.
pub const CANONICAL_TEMPORAL_DELIMITER: [u8; 2] = [0x12, 0x00];

/// Metadata a host attaches to each packet fed into [`Depayloader::push`].
/// Deliberately minimal: this crate parses only what it needs (the
/// aggregation header) and trusts the host for RTP header parsing
/// proper, matching the "transport and socket I/O... out of scope"
/// non-goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacketMeta {
    pub marker: bool,
    pub timestamp: u32,
    pub sequence_number: Option<u16>,
    pub pts: u64,
}

#[derive(Debug, Default)]
struct FragmentState {
    bytes: BytesMut,
    rtp_timestamp: u32,
    deadline_ms: Option<u64>,
}

impl FragmentState {
    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.deadline_ms = None;
    }
}

/// Reassembles a per-stream sequence of AV1 RTP packets into AV1 temporal
/// units. Single instance per RTP stream; `&mut self` throughout, no
/// interior mutability and no background timer — the host drives
/// fragment-timeout checks by calling [`Depayloader::poll_timeout`].
pub struct Depayloader {
    config: DepayloaderConfig,

    current_tu_bytes: BytesMut,
    current_tu_rtp_timestamp: Option<u32>,
    current_tu_pts: u64,
    current_tu_has_sequence_header: bool,
    current_tu_has_frame: bool,
    current_tu_is_keyframe: bool,

    fragment: FragmentState,

    seq_tracker: SequenceTracker,
    w_state: WState,
    reorder: Option<ReorderBuffer>,

    cached_sequence_header: Option<Bytes>,
    sequence_header_generation: u64,

    waiting_for_keyframe: bool,
    waiting_for_sequence_header: bool,
    keyframe_established: bool,
    stream_format_sent: bool,

    counters: Counters,
    now_ms: u64,
}

impl Depayloader {
    pub fn new(config: DepayloaderConfig) -> Self {
        let reorder = (config.max_reorder_buffer > 0)
            .then(|| ReorderBuffer::new(config.max_reorder_buffer, DEFAULT_REORDER_TIMEOUT));
        Depayloader {
            seq_tracker: SequenceTracker::new(config.gap_threshold),
            config,
            current_tu_bytes: BytesMut::new(),
            current_tu_rtp_timestamp: None,
            current_tu_pts: 0,
            current_tu_has_sequence_header: false,
            current_tu_has_frame: false,
            current_tu_is_keyframe: false,
            fragment: FragmentState::default(),
            w_state: WState::Idle,
            reorder,
            cached_sequence_header: None,
            sequence_header_generation: 0,
            waiting_for_keyframe: false,
            waiting_for_sequence_header: false,
            keyframe_established: false,
            stream_format_sent: false,
            counters: Counters::default(),
            now_ms: 0,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn sequence_header_generation(&self) -> u64 {
        self.sequence_header_generation
    }

    /// Checks the armed fragment timeout against `now_ms`; drops the
    /// in-flight fragment and emits a discontinuity if it has expired.
    /// The host is expected to call this periodically (e.g. once per
    /// incoming packet, or on an external tick) — this crate has no
    /// internal timer thread.
    pub fn poll_timeout(&mut self, now_ms: u64) -> Vec<DepayloadEvent> {
        self.now_ms = now_ms;
        let mut events = Vec::new();
        if let Some(deadline) = self.fragment.deadline_ms {
            if now_ms >= deadline {
                log::warn!("obu fragment timed out after {}ms", self.config.fragment_timeout_ms);
                self.fragment.clear();
                self.w_state = WState::Idle;
                self.counters.record_timeout();
                events.push(DepayloadEvent::Discontinuity {
                    reason: "fragment_timeout",
                });
            }
        }
        events
    }

    /// Processes one RTP packet, returning any events it produced (zero or
    /// more of: a reassembled temporal unit, a discontinuity, a keyframe
    /// request).
    pub fn push(&mut self, meta: RtpPacketMeta, payload: &Bytes) -> Vec<DepayloadEvent> {
        let mut events = Vec::new();

        if payload.is_empty() {
            return events;
        }

        let header = match crate::aggregation_header::AggregationHeader::decode(payload) {
            Ok(h) => h,
            Err(_) => {
                log::warn!("dropping packet with invalid aggregation header");
                self.reset_fragment_state();
                self.counters.record_packet_dropped();
                events.push(DepayloadEvent::Discontinuity {
                    reason: "invalid_aggregation_header",
                });
                return events;
            }
        };

        if let Some(seq) = meta.sequence_number {
            let prior_seq = self.seq_tracker.last_seq();
            let outcome = self.seq_tracker.observe(seq);
            match outcome {
                SequenceOutcome::Duplicate | SequenceOutcome::OutOfOrder => {
                    log::debug!("dropping duplicate/out-of-order packet seq={seq}");
                    self.counters.record_packet_dropped();
                    return events;
                }
                SequenceOutcome::Ok | SequenceOutcome::LargeGap => {
                    // Any non-contiguous advance while a fragment is in
                    // flight corrupts that OBU, independent of whether the
                    // gap is small enough to otherwise pass as `Ok` — the
                    // large-gap-outside-a-fragment tolerance in spec.md §7
                    // only applies when no fragment is being reassembled.
                    let non_contiguous = prior_seq.is_some_and(|p| wrapping_diff(seq, p) != 1);
                    if self.w_state == WState::InFragment && non_contiguous {
                        log::warn!("sequence gap during fragment reassembly, resetting");
                        self.reset_fragment_state();
                        self.keyframe_established = false;
                        self.counters.record_fragment_dropped();
                        self.counters.record_keyframe_requested();
                        events.push(DepayloadEvent::Discontinuity {
                            reason: "sequence_gap_in_fragment",
                        });
                        events.push(DepayloadEvent::KeyframeRequest {
                            reason: "sequence_gap_in_fragment",
                        });
                        return events;
                    }
                    if outcome == SequenceOutcome::LargeGap {
                        log::warn!("large sequence number gap, accepting (partial data likely)");
                    }
                }
            }
        }

        let prior_w_state = self.w_state;
        let edge = FragmentEdge::from_z_y(header.z, header.y);
        let transition = prior_w_state.advance(edge);
        let effective_z = match transition {
            WTransition::Accepted { next } => {
                self.w_state = next;
                header.z
            }
            WTransition::Rejected => {
                log::warn!("invalid aggregation-header W transition, resetting fragment state");
                if prior_w_state == WState::InFragment {
                    self.fragment.clear();
                    self.counters.record_fragment_dropped();
                }
                self.w_state = if edge == FragmentEdge::Start {
                    WState::InFragment
                } else {
                    WState::Idle
                };
                false
            }
        };

        let elements = match parse_elements(&payload.slice(1..), header.w) {
            Ok(e) => e,
            Err(_) => {
                log::warn!("malformed OBU-element framing, keeping what was extracted");
                self.counters.record_packet_dropped();
                Vec::new()
            }
        };
        if elements.is_empty() {
            return events;
        }

        if self.current_tu_rtp_timestamp.is_some_and(|ts| ts != meta.timestamp)
            && !self.current_tu_bytes.is_empty()
        {
            log::warn!("rtp timestamp changed mid temporal-unit, dropping partial accumulation");
            self.current_tu_bytes.clear();
            self.current_tu_has_sequence_header = false;
            self.current_tu_has_frame = false;
            self.current_tu_is_keyframe = false;
        }
        self.current_tu_rtp_timestamp = Some(meta.timestamp);
        self.current_tu_pts = meta.pts;

        let last_index = elements.len() - 1;
        for (i, element) in elements.into_iter().enumerate() {
            let is_first = i == 0;
            let is_last = i == last_index;

            let starts_fragment = is_first && effective_z;
            let ends_in_fragment = is_last && header.y;

            if starts_fragment {
                if self.fragment.is_empty() || self.fragment.rtp_timestamp != meta.timestamp {
                    log::warn!("fragment completion with no matching in-flight fragment, dropping");
                    self.counters.record_fragment_dropped();
                    if !ends_in_fragment {
                        continue;
                    }
                    // Falls through: this element also starts a fresh
                    // fragment (Z=1,Y=1 with nothing to continue is
                    // malformed, but we still track it as a fresh start
                    // so a subsequent Z=1,Y=0 packet can complete it).
                    self.fragment.clear();
                    self.fragment.rtp_timestamp = meta.timestamp;
                    self.fragment.bytes.extend_from_slice(&element);
                    self.arm_fragment_timeout();
                    continue;
                }
                if self.fragment.bytes.len() + element.len() > self.config.max_fragment_size {
                    log::warn!("fragment exceeded max_fragment_size, resetting");
                    self.reset_fragment_state();
                    self.counters.record_timeout();
                    events.push(DepayloadEvent::Discontinuity {
                        reason: "fragment_too_large",
                    });
                    continue;
                }
                self.fragment.bytes.extend_from_slice(&element);

                if ends_in_fragment {
                    // Z=1,Y=1: middle fragment, stays in flight.
                    self.arm_fragment_timeout();
                    continue;
                }
                // Z=1,Y=0: fragment completes.
                self.fragment.deadline_ms = None;
                let completed = self.fragment.bytes.split().freeze();
                self.handle_complete_obu(completed);
                continue;
            }

            if ends_in_fragment {
                // Z=0,Y=1: first fragment of a new OBU.
                if !self.fragment.is_empty() {
                    log::warn!("starting new fragment while one was in flight, dropping the old one");
                    self.counters.record_fragment_dropped();
                }
                self.fragment.clear();
                self.fragment.rtp_timestamp = meta.timestamp;
                self.fragment.bytes.extend_from_slice(&element);
                self.arm_fragment_timeout();
                continue;
            }

            // Ordinary complete OBU element.
            self.handle_complete_obu(element);
        }

        if self.current_tu_bytes.len() > self.config.max_access_unit_size {
            log::warn!("access unit exceeded max_access_unit_size, resetting");
            self.current_tu_bytes.clear();
            self.current_tu_has_sequence_header = false;
            self.current_tu_has_frame = false;
            self.current_tu_is_keyframe = false;
            events.push(DepayloadEvent::Discontinuity {
                reason: "access_unit_too_large",
            });
        }

        if header.n {
            log::debug!("new coded video sequence signaled");
        }

        if meta.marker {
            events.extend(self.finalize_temporal_unit());
        }

        events
    }

    /// Elementary reordering front end for transports that can't guarantee
    /// in-order delivery: buffers `payload` through this depayloader's
    /// per-timestamp [`ReorderBuffer`] (depth `max_reorder_buffer`) and
    /// replays whatever group becomes ready through [`Depayloader::push`]
    /// in sequence-number order. A group is released as soon as it has
    /// seen its marker packet, or after the reorder timeout / depth limit,
    /// whichever comes first. Falls back to calling `push` directly when
    /// reordering is disabled (`max_reorder_buffer == 0`) or the packet
    /// carries no sequence number to sort by — this stays "elementary"
    /// sequence-number ordering, not a general jitter buffer.
    pub fn push_reordering(&mut self, meta: RtpPacketMeta, payload: &Bytes) -> Vec<DepayloadEvent> {
        let (Some(reorder), Some(seq)) = (self.reorder.as_mut(), meta.sequence_number) else {
            return self.push(meta, payload);
        };
        reorder.push(meta.timestamp, seq, payload.clone(), meta.marker, meta.pts);

        let mut ready = Vec::new();
        while let Some((timestamp, packets)) = self.reorder.as_mut().unwrap().pop_ready() {
            for packet in packets {
                ready.push((timestamp, packet));
            }
        }

        let mut events = Vec::new();
        for (timestamp, packet) in ready {
            events.extend(self.push(
                RtpPacketMeta {
                    marker: packet.marker,
                    timestamp,
                    sequence_number: Some(packet.sequence_number),
                    pts: packet.pts,
                },
                &packet.payload,
            ));
        }
        events
    }

    fn arm_fragment_timeout(&mut self) {
        self.fragment.deadline_ms = Some(self.now_ms + self.config.fragment_timeout_ms);
    }

    fn reset_fragment_state(&mut self) {
        self.fragment.clear();
        self.w_state = WState::Idle;
    }

    /// Normalizes a raw (no-size-field) OBU element, applies layer
    /// filtering, strips temporal delimiters/tile lists, opportunistically
    /// caches sequence headers, and appends whatever remains to the
    /// current temporal unit's accumulation buffer.
    fn handle_complete_obu(&mut self, raw: Bytes) {
        let info = match parse_header(&raw) {
            Ok(info) => info,
            Err(e) => {
                log::warn!("dropping malformed reassembled OBU: {e}");
                self.counters.record_packet_dropped();
                return;
            }
        };
        let obu = Obu {
            header: raw[0],
            extension_header: info.extension.map(|_| raw[1]),
            payload: raw.slice(info.header_len..),
        }
        .ensure_size_field();

        if let Some(ext) = info.extension {
            let exceeds_temporal = self
                .config
                .max_temporal_id
                .is_some_and(|max| ext.temporal_id > max);
            let exceeds_spatial = self
                .config
                .max_spatial_id
                .is_some_and(|max| ext.spatial_id > max);
            if exceeds_temporal || exceeds_spatial {
                self.counters.record_layer_filtered();
                return;
            }
        }

        let obu_type = obu.obu_type();
        if obu_type.should_strip_on_emit() {
            return;
        }

        if obu_type == ObuType::SequenceHeader {
            self.cached_sequence_header = Some(obu.marshal());
            self.sequence_header_generation += 1;
            self.current_tu_has_sequence_header = true;
        }
        if matches!(obu_type, ObuType::Frame | ObuType::FrameHeader) {
            self.current_tu_has_frame = true;
            if is_keyframe_payload(&obu.payload) {
                self.current_tu_is_keyframe = true;
            }
        }

        self.current_tu_bytes.extend_from_slice(&obu.marshal());
    }

    /// Applies the keyframe/sequence-header gating policy and resets
    /// per-temporal-unit state, whether or not anything was emitted.
    fn finalize_temporal_unit(&mut self) -> Vec<DepayloadEvent> {
        let mut events = Vec::new();
        let tu_bytes = self.current_tu_bytes.split().freeze();
        let rtp_timestamp = self.current_tu_rtp_timestamp.take().unwrap_or(0);
        let pts = self.current_tu_pts;
        let has_sequence_header = self.current_tu_has_sequence_header;
        let has_frame = self.current_tu_has_frame;
        let is_keyframe = self.current_tu_is_keyframe;
        self.current_tu_has_sequence_header = false;
        self.current_tu_has_frame = false;
        self.current_tu_is_keyframe = false;

        if tu_bytes.is_empty() {
            return events;
        }

        if !self.config.require_sequence_header {
            events.push(self.emit(tu_bytes, None, pts, rtp_timestamp, has_frame && is_keyframe));
            return events;
        }

        if self.cached_sequence_header.is_none() && has_frame {
            self.waiting_for_sequence_header = true;
            self.counters.record_keyframe_requested();
            events.push(DepayloadEvent::KeyframeRequest {
                reason: "no_cached_sequence_header",
            });
            return events;
        }

        if !self.keyframe_established && has_frame && !is_keyframe {
            self.waiting_for_keyframe = true;
            self.counters.record_keyframe_requested();
            events.push(DepayloadEvent::KeyframeRequest {
                reason: "keyframe_not_established",
            });
            return events;
        }

        if has_sequence_header && has_frame {
            self.keyframe_established = true;
            self.waiting_for_keyframe = false;
            self.waiting_for_sequence_header = false;
            events.push(self.emit(tu_bytes, None, pts, rtp_timestamp, is_keyframe));
            return events;
        }

        let prefix = self.cached_sequence_header.clone();
        events.push(self.emit(tu_bytes, prefix, pts, rtp_timestamp, is_keyframe));
        events
    }

    fn emit(
        &mut self,
        tu_bytes: Bytes,
        cached_sequence_header: Option<Bytes>,
        pts: u64,
        rtp_timestamp: u32,
        key_frame: bool,
    ) -> DepayloadEvent {
        let mut out = BytesMut::with_capacity(
            CANONICAL_TEMPORAL_DELIMITER.len()
                + cached_sequence_header.as_ref().map_or(0, Bytes::len)
                + tu_bytes.len(),
        );
        out.extend_from_slice(&CANONICAL_TEMPORAL_DELIMITER);
        if let Some(seq_header) = cached_sequence_header {
            out.extend_from_slice(&seq_header);
        }
        out.extend_from_slice(&tu_bytes);
        self.stream_format_sent = true;
        DepayloadEvent::TemporalUnit {
            bytes: out.freeze(),
            pts,
            rtp_timestamp,
            key_frame,
        }
    }
}

/// Splits the bytes after the aggregation header into raw OBU-element
/// byte slices, given the header's `W` field. Elements carry no size
/// field; the caller determines which (if any)
/// of the first/last elements are fragment continuations from `Z`/`Y`.
fn parse_elements(data: &Bytes, w: u8) -> Result<Vec<Bytes>> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    if w == 0 {
        while offset < data.len() {
            let (leb_len, elem_len) = read_leb128(&data[offset..])?;
            let start = offset + leb_len;
            let elem_len = elem_len as usize;
            if start + elem_len > data.len() {
                return Err(Error::IncompleteObu {
                    expected: start + elem_len,
                    actual: data.len(),
                });
            }
            out.push(data.slice(start..start + elem_len));
            offset = start + elem_len;
        }
    } else {
        for i in 0..w {
            if i == w - 1 {
                out.push(data.slice(offset..));
                offset = data.len();
            } else {
                let (leb_len, elem_len) = read_leb128(&data[offset..])?;
                let start = offset + leb_len;
                let elem_len = elem_len as usize;
                if start + elem_len > data.len() {
                    return Err(Error::IncompleteObu {
                        expected: start + elem_len,
                        actual: data.len(),
                    });
                }
                out.push(data.slice(start..start + elem_len));
                offset = start + elem_len;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod depayloader_test {
    use super::*;
    use crate::aggregation_header::AggregationHeader;
    use crate::obu::OBU_HAS_SIZE_BIT;

    fn raw_obu_element(obu_type: u8, payload: &[u8]) -> Bytes {
        // has_size_field = 0: this is how OBU elements travel inside a packet.
        let header = obu_type << 3;
        let mut out = vec![header];
        out.extend_from_slice(payload);
        Bytes::from(out)
    }

    fn packet(header: AggregationHeader, elements: &[Bytes]) -> Bytes {
        let mut out = BytesMut::new();
        out.extend_from_slice(&header.encode().unwrap());
        let last = elements.len().saturating_sub(1);
        for (i, e) in elements.iter().enumerate() {
            if header.w != 0 && i == last {
                out.extend_from_slice(e);
            } else {
                let mut leb = crate::leb128::encode_leb128(e.len() as u64);
                out.extend_from_slice(&mut leb);
                out.extend_from_slice(e);
            }
        }
        out.freeze()
    }

    fn meta(marker: bool, timestamp: u32, seq: u16) -> RtpPacketMeta {
        RtpPacketMeta {
            marker,
            timestamp,
            sequence_number: Some(seq),
            pts: timestamp as u64,
        }
    }

    fn obu_bytes(obu_type: u8, has_size: bool, payload: &[u8]) -> Bytes {
        let mut header = obu_type << 3;
        if has_size {
            header |= OBU_HAS_SIZE_BIT;
        }
        Obu {
            header,
            extension_header: None,
            payload: Bytes::copy_from_slice(payload),
        }
        .marshal()
    }

    #[test]
    fn scenario_one_small_single_obu_emits_immediately() {
        // AggregationHeader Z=0,Y=0,W=1,N=0, one complete frame-header OBU.
        let header = AggregationHeader::new(false, false, 1, false);
        let element = raw_obu_element(3, &[0x01, 0x02, 0x03]);
        let pkt = packet(header, &[element]);

        let mut dep = Depayloader::new(DepayloaderConfig {
            require_sequence_header: false,
            ..Default::default()
        });
        let events = dep.push(meta(true, 1000, 1), &pkt);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DepayloadEvent::TemporalUnit { bytes, .. } => {
                assert!(bytes.starts_with(&CANONICAL_TEMPORAL_DELIMITER));
            }
            other => panic!("expected TemporalUnit, got {other:?}"),
        }
    }

    #[test]
    fn empty_payload_is_dropped_silently() {
        let mut dep = Depayloader::new(DepayloaderConfig::default());
        let events = dep.push(meta(false, 0, 0), &Bytes::new());
        assert!(events.is_empty());
    }

    #[test]
    fn reserved_bit_set_resets_and_emits_discontinuity() {
        let mut dep = Depayloader::new(DepayloaderConfig::default());
        let bad = Bytes::from_static(&[0b0000_0001, 0x00]);
        let events = dep.push(meta(false, 0, 0), &bad);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DepayloadEvent::Discontinuity { .. }));
    }

    #[test]
    fn fragment_reassembly_across_three_packets() {
        let mut dep = Depayloader::new(DepayloaderConfig {
            require_sequence_header: false,
            ..Default::default()
        });

        let full_obu_element = {
            // Build a frame OBU as it would appear with a size field, then
            // strip it to simulate what the payloader would have fragmented.
            let whole = obu_bytes(6, true, &vec![0xab; 240]);
            let info = parse_header(&whole).unwrap();
            let without_size = {
                let (leb_len, _n) = read_leb128(&whole[info.header_len..]).unwrap();
                let payload_start = info.header_len + leb_len;
                let mut out = vec![whole[0] & !OBU_HAS_SIZE_BIT];
                out.extend_from_slice(&whole[payload_start..]);
                out
            };
            Bytes::from(without_size)
        };
        let third = full_obu_element.len() / 3;
        let first_chunk = full_obu_element.slice(0..third);
        let mid_chunk = full_obu_element.slice(third..2 * third);
        let last_chunk = full_obu_element.slice(2 * third..);

        let first_header = AggregationHeader::new(false, true, 1, false);
        let mid_header = AggregationHeader::new(true, true, 1, false);
        let last_header = AggregationHeader::new(true, false, 1, false);

        let mut first_pkt = BytesMut::new();
        first_pkt.extend_from_slice(&first_header.encode().unwrap());
        first_pkt.extend_from_slice(&first_chunk);
        let events = dep.push(meta(false, 5000, 10), &first_pkt.freeze());
        assert!(events.is_empty());

        let mut mid_pkt = BytesMut::new();
        mid_pkt.extend_from_slice(&mid_header.encode().unwrap());
        mid_pkt.extend_from_slice(&mid_chunk);
        let events = dep.push(meta(false, 5000, 11), &mid_pkt.freeze());
        assert!(events.is_empty());

        let mut last_pkt = BytesMut::new();
        last_pkt.extend_from_slice(&last_header.encode().unwrap());
        last_pkt.extend_from_slice(&last_chunk);
        let events = dep.push(meta(true, 5000, 12), &last_pkt.freeze());
        assert_eq!(events.len(), 1);
        match &events[0] {
            DepayloadEvent::TemporalUnit { bytes, .. } => {
                assert_eq!(
                    bytes.as_ref(),
                    &[
                        CANONICAL_TEMPORAL_DELIMITER.as_slice(),
                        obu_bytes(6, true, &vec![0xab; 240]).as_ref(),
                    ]
                    .concat()[..]
                );
            }
            other => panic!("expected TemporalUnit, got {other:?}"),
        }
    }

    #[test]
    fn loss_during_fragment_emits_discontinuity_and_keyframe_request() {
        // Spec §8 scenario 6, verbatim: first fragment (Z=0,Y=1) at seq N,
        // then an unrelated packet at seq N+5. The gap is well under the
        // default LargeGap threshold (~100), but any non-contiguous advance
        // while a fragment is in flight must still be treated as loss.
        let mut dep = Depayloader::new(DepayloaderConfig::default());
        let start_header = AggregationHeader::new(false, true, 1, false);
        let mut start_pkt = BytesMut::new();
        start_pkt.extend_from_slice(&start_header.encode().unwrap());
        start_pkt.extend_from_slice(&[0xaa; 10]);
        dep.push(meta(false, 9000, 100), &start_pkt.freeze());

        let unrelated_header = AggregationHeader::new(false, false, 1, false);
        let element = raw_obu_element(6, &[1, 2, 3]);
        let pkt = packet(unrelated_header, &[element]);
        let events = dep.push(meta(false, 9040, 105), &pkt);

        assert!(events
            .iter()
            .any(|e| matches!(e, DepayloadEvent::Discontinuity { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, DepayloadEvent::KeyframeRequest { .. })));
        assert_eq!(dep.counters().fragments_dropped, 1);
    }

    #[test]
    fn suppresses_inter_frame_until_keyframe_established() {
        let mut dep = Depayloader::new(DepayloaderConfig::default());
        // Frame OBU, inter (show_existing_frame=0, frame_type=1).
        let header = AggregationHeader::new(false, false, 1, false);
        let element = raw_obu_element(6, &[0b0010_0000]);
        let pkt = packet(header, &[element]);
        let events = dep.push(meta(true, 1, 1), &pkt);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DepayloadEvent::KeyframeRequest { .. }));
        assert!(!dep.keyframe_established);
    }

    #[test]
    fn emits_after_sequence_header_and_keyframe() {
        let mut dep = Depayloader::new(DepayloaderConfig::default());
        let header = AggregationHeader::new(false, false, 2, true);
        let seq_header_element = raw_obu_element(1, &[0xaa]);
        // Frame OBU, keyframe (show_existing_frame=0, frame_type=0).
        let frame_element = raw_obu_element(6, &[0b0000_0000]);
        let pkt = packet(header, &[seq_header_element, frame_element]);
        let events = dep.push(meta(true, 1, 1), &pkt);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DepayloadEvent::TemporalUnit {
                key_frame: true,
                ..
            }
        ));
        assert!(dep.keyframe_established);
    }

    #[test]
    fn duplicate_sequence_number_is_dropped_without_discontinuity() {
        let mut dep = Depayloader::new(DepayloaderConfig::default());
        let header = AggregationHeader::new(false, false, 1, false);
        let element = raw_obu_element(6, &[1, 2, 3]);
        let pkt = packet(header, &[element]);
        dep.push(meta(false, 1, 5), &pkt);
        let events = dep.push(meta(false, 1, 5), &pkt);
        assert!(events.is_empty());
        assert_eq!(dep.counters().packets_dropped, 1);
    }

    #[test]
    fn poll_timeout_drops_stale_fragment() {
        let mut dep = Depayloader::new(DepayloaderConfig {
            fragment_timeout_ms: 500,
            ..Default::default()
        });
        let start_header = AggregationHeader::new(false, true, 1, false);
        let mut start_pkt = BytesMut::new();
        start_pkt.extend_from_slice(&start_header.encode().unwrap());
        start_pkt.extend_from_slice(&[0xaa; 10]);
        dep.push(meta(false, 1, 1), &start_pkt.freeze());

        let events = dep.poll_timeout(1000);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DepayloadEvent::Discontinuity { .. }));
        assert_eq!(dep.counters().timeouts, 1);
    }

    #[test]
    fn push_reordering_withholds_release_until_the_gap_is_filled() {
        let mut dep = Depayloader::new(DepayloaderConfig {
            require_sequence_header: false,
            ..Default::default()
        });
        let header = AggregationHeader::new(false, false, 1, false);
        let first = packet(header, &[raw_obu_element(2, &[])]); // seq 1
        let last = packet(header, &[raw_obu_element(6, &[1])]); // seq 3, marker
        let middle = packet(header, &[raw_obu_element(6, &[2])]); // seq 2

        let events = dep.push_reordering(meta(false, 42, 1), &first);
        assert!(events.is_empty());

        // Marker packet (seq 3) arrives before seq 2: the run (1, 3) has a
        // gap, so the group must stay withheld despite having seen marker.
        let events = dep.push_reordering(meta(true, 42, 3), &last);
        assert!(events.is_empty(), "group withheld until the gap is filled");

        // The missing packet arrives: now (1, 2, 3) is contiguous and the
        // whole group is replayed in sequence-number order.
        let events = dep.push_reordering(meta(false, 42, 2), &middle);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DepayloadEvent::TemporalUnit { bytes, .. } => {
                // Replayed in sequence-number order: the temporal delimiter
                // (seq 1) is stripped, leaving frame([2]) then frame([1]).
                let expected = [
                    CANONICAL_TEMPORAL_DELIMITER.as_slice(),
                    obu_bytes(6, true, &[2]).as_ref(),
                    obu_bytes(6, true, &[1]).as_ref(),
                ]
                .concat();
                assert_eq!(bytes.as_ref(), expected.as_slice());
            }
            other => panic!("expected TemporalUnit, got {other:?}"),
        }
    }

    #[test]
    fn push_reordering_falls_back_to_push_without_sequence_numbers() {
        let mut dep = Depayloader::new(DepayloaderConfig {
            require_sequence_header: false,
            ..Default::default()
        });
        let header = AggregationHeader::new(false, false, 1, false);
        let pkt = packet(header, &[raw_obu_element(6, &[1, 2, 3])]);
        let events = dep.push_reordering(
            RtpPacketMeta {
                marker: true,
                timestamp: 1,
                sequence_number: None,
                pts: 0,
            },
            &pkt,
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn temporal_delimiter_and_tile_list_are_stripped() {
        let mut dep = Depayloader::new(DepayloaderConfig {
            require_sequence_header: false,
            ..Default::default()
        });
        let header = AggregationHeader::new(false, false, 3, false);
        let td = raw_obu_element(2, &[]);
        let tile_list = raw_obu_element(8, &[0x01]);
        let frame = raw_obu_element(6, &[0x00]);
        let pkt = packet(header, &[td, tile_list, frame]);
        let events = dep.push(meta(true, 1, 1), &pkt);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DepayloadEvent::TemporalUnit { bytes, .. } => {
                // Only the canonical TD plus the one surviving frame OBU.
                assert_eq!(bytes.len(), CANONICAL_TEMPORAL_DELIMITER.len() + obu_bytes(6, true, &[0x00]).len());
            }
            other => panic!("expected TemporalUnit, got {other:?}"),
        }
    }
}
