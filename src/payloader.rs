//! MTU-bounded AV1 access-unit packetizer.
//!
//! The aggregate/fragment planning pass below follows a two-phase "plan
//! then render" shape: the same `W<=3` omit-size optimization, the same
//! hybrid aggregation+fragmentation logic used elsewhere for this kind
//! of RTP payloader, adapted to this crate's `Obu`/`AggregationHeader`
//! types and extended with a TU-aware marker pass (§4.6) and a
//! validate-then-fall-back-to-opaque front end (§4.7).

use std::cmp::min;

use bytes::{Bytes, BytesMut};

use crate::aggregation_header::AggregationHeader;
use crate::config::PayloaderConfig;
use crate::error::{Error, Result};
use crate::leb128::{leb128_size, BytesMutExt};
use crate::obu::{detect_framing, split_length_prefixed, split_low_overhead, Obu, ObuFraming};
use crate::temporal_unit::classify;
use crate::validator::validate_low_overhead;

/// Packets beyond this per-packet OBU-element count must use `W=0` and
/// prefix every element (including the last) with its LEB128 length.
const MAX_OBUS_TO_OMIT_SIZE: usize = 3;

struct PacketPlan {
    first_obu_index: usize,
    num_obu_elements: usize,
    first_obu_offset: usize,
    last_obu_size: usize,
    packet_size: usize,
}

impl PacketPlan {
    fn new(first_obu_index: usize) -> Self {
        PacketPlan {
            first_obu_index,
            num_obu_elements: 0,
            first_obu_offset: 0,
            last_obu_size: 0,
            packet_size: 0,
        }
    }
}

fn additional_bytes_for_previous_element(packet: &PacketPlan) -> usize {
    if packet.packet_size == 0 || packet.num_obu_elements > MAX_OBUS_TO_OMIT_SIZE {
        0
    } else {
        leb128_size(packet.last_obu_size as u64)
    }
}

fn max_fragment_size(remaining: usize) -> usize {
    if remaining <= 1 {
        return 0;
    }
    let mut i = 1;
    loop {
        if remaining < (1usize << (7 * i)) + i {
            return remaining - i;
        }
        i += 1;
    }
}

/// Plans how `lengths` (one per OBU's on-wire content: header [+ ext] +
/// payload, size field excluded) pack into `max_payload`-sized packets.
fn plan_packets(lengths: &[usize], max_payload: usize) -> Vec<PacketPlan> {
    if lengths.is_empty() || max_payload < 3 {
        return Vec::new();
    }

    let mut packets = vec![PacketPlan::new(0)];
    let mut remaining = max_payload;

    for (obu_index, &size) in lengths.iter().enumerate() {
        let mut packet = packets.pop().unwrap();
        let mut extra = additional_bytes_for_previous_element(&packet);
        let min_required = if packet.num_obu_elements >= MAX_OBUS_TO_OMIT_SIZE {
            2
        } else {
            1
        };
        if remaining < extra + min_required {
            packets.push(packet);
            packet = PacketPlan::new(obu_index);
            remaining = max_payload;
            extra = 0;
        }
        packet.packet_size += extra;
        remaining -= extra;
        packet.num_obu_elements += 1;
        let must_write_size = packet.num_obu_elements > MAX_OBUS_TO_OMIT_SIZE;

        let mut required = size;
        if must_write_size {
            required += leb128_size(size as u64);
        }
        if required < remaining {
            packet.last_obu_size = size;
            packet.packet_size += required;
            remaining -= required;
            packets.push(packet);
            continue;
        }

        let max_first_fragment = if must_write_size {
            max_fragment_size(remaining)
        } else {
            remaining
        };
        let first_fragment_size = min(size.saturating_sub(1), max_first_fragment);
        if first_fragment_size == 0 {
            packet.num_obu_elements -= 1;
            packet.packet_size -= extra;
        } else {
            packet.packet_size += first_fragment_size;
            if must_write_size {
                packet.packet_size += leb128_size(first_fragment_size as u64);
            }
            packet.last_obu_size = first_fragment_size;
        }
        packets.push(packet);

        let mut offset = first_fragment_size;
        while offset + max_payload < size {
            let mut mid = PacketPlan::new(obu_index);
            mid.num_obu_elements = 1;
            mid.first_obu_offset = offset;
            mid.last_obu_size = max_payload;
            mid.packet_size = max_payload;
            packets.push(mid);
            offset += max_payload;
        }

        // The preceding loop already drains `size` down to at most
        // `max_payload` remaining, so the tail fragment below always fits
        // in one packet — no further splitting is needed here.
        let last_fragment_size = size - offset;
        let mut tail = PacketPlan::new(obu_index);
        tail.num_obu_elements = 1;
        tail.first_obu_offset = offset;
        tail.last_obu_size = last_fragment_size;
        tail.packet_size = last_fragment_size;
        packets.push(tail);
        remaining = max_payload - last_fragment_size;
    }

    packets
}

fn last_element_index(packet: &PacketPlan) -> usize {
    packet.first_obu_index + packet.num_obu_elements.max(1) - 1
}

fn last_obu_offset(packet: &PacketPlan) -> usize {
    if packet.num_obu_elements == 1 {
        packet.first_obu_offset
    } else {
        0
    }
}

fn build_aggregation_header(
    packet: &PacketPlan,
    lengths: &[usize],
    is_first_packet: bool,
    starts_new_coded_video_sequence: bool,
) -> AggregationHeader {
    let z = packet.first_obu_offset > 0;
    let last_idx = last_element_index(packet);
    let y = last_obu_offset(packet) + packet.last_obu_size < lengths[last_idx];
    let w = if packet.num_obu_elements <= MAX_OBUS_TO_OMIT_SIZE {
        packet.num_obu_elements as u8
    } else {
        0
    };
    let n = is_first_packet && starts_new_coded_video_sequence;
    AggregationHeader::new(z, y, w, n)
}

fn render_packet(packet: &PacketPlan, contents: &[Bytes], header: &AggregationHeader) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(1 + packet.packet_size);
    out.put_slice(&header.encode()?);

    let mut offset = packet.first_obu_offset;
    for i in 0..packet.num_obu_elements.saturating_sub(1) {
        let content = &contents[packet.first_obu_index + i];
        let fragment_len = content.len() - offset;
        out.put_leb128(fragment_len as u64);
        out.put_slice(&content[offset..offset + fragment_len]);
        offset = 0;
    }

    if packet.num_obu_elements > 0 {
        let last_idx = last_element_index(packet);
        let content = &contents[last_idx];
        let must_write_size = packet.num_obu_elements > MAX_OBUS_TO_OMIT_SIZE;
        if must_write_size {
            out.put_leb128(packet.last_obu_size as u64);
        }
        out.put_slice(&content[offset..offset + packet.last_obu_size]);
    }

    Ok(out.freeze())
}

pub struct Payloader {
    config: PayloaderConfig,
}

impl Payloader {
    /// Rejects `config.header_mode == HeaderMode::Draft` at construction
    /// rather than accepting it and silently emitting `Spec`-format
    /// packets; see `PayloaderConfig::check_header_mode`.
    pub fn new(config: PayloaderConfig) -> Result<Self> {
        config.check_header_mode()?;
        Ok(Payloader { config })
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.config.set_mtu(mtu);
    }

    pub fn config(&self) -> &PayloaderConfig {
        &self.config
    }

    /// RTP timestamp for a presentation timestamp at this payloader's
    /// (fixed, 90 kHz) clock rate. `pts` is expected to already be
    /// expressed in clock-rate ticks, matching this crate's non-goal of
    /// owning PTS-to-timescale conversion.
    pub fn rtp_timestamp_for_pts(&self, pts: u64) -> u32 {
        pts as u32
    }

    pub fn payload(&mut self, au: &Bytes, _pts: u64) -> Result<Vec<(Bytes, bool)>> {
        if au.is_empty() {
            return Ok(Vec::new());
        }

        let framing = detect_framing(au);
        if self.config.validate && framing == ObuFraming::LowOverhead {
            match validate_low_overhead(au) {
                Err(e @ Error::PartialObuAtBoundary { .. }) => return Err(e),
                _ => {}
            }
        }

        let obus = match framing {
            ObuFraming::LowOverhead => split_low_overhead(au),
            ObuFraming::LengthPrefixed => split_length_prefixed(au),
        };
        if obus.is_empty() {
            return Ok(Vec::new());
        }

        let info = classify(&obus);
        let contents: Vec<Bytes> = obus.iter().map(|o| o.without_size_field().marshal()).collect();
        let lengths: Vec<usize> = contents.iter().map(|c| c.len()).collect();

        let max_payload = self.config.mtu.saturating_sub(crate::aggregation_header::AGGREGATION_HEADER_SIZE);
        let plans = plan_packets(&lengths, max_payload);
        if plans.is_empty() {
            return Err(Error::MtuTooSmall);
        }

        let mut last_packet_touching = vec![0usize; obus.len()];
        for (packet_index, packet) in plans.iter().enumerate() {
            let start = packet.first_obu_index;
            let end = last_element_index(packet);
            for slot in last_packet_touching.iter_mut().take(end + 1).skip(start) {
                *slot = packet_index;
            }
        }

        let mut markers = vec![false; plans.len()];
        if self.config.tu_aware {
            for span in &info.temporal_units {
                if span.end == 0 {
                    continue;
                }
                let last_obu = span.end - 1;
                markers[last_packet_touching[last_obu]] = true;
            }
        } else if let Some(last) = markers.last_mut() {
            *last = true;
        }

        let mut out = Vec::with_capacity(plans.len());
        for (packet_index, packet) in plans.iter().enumerate() {
            let header = build_aggregation_header(
                packet,
                &lengths,
                packet_index == 0,
                info.starts_new_coded_video_sequence,
            );
            let payload = render_packet(packet, &contents, &header)?;
            out.push((payload, markers[packet_index]));
        }
        Ok(out)
    }
}
