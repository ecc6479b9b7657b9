//! Per-timestamp packet reorder buffer: holds a bounded number of RTP
//! timestamp groups so that a handful of out-of-order packets can be
//! resequenced before being handed to the depayloader, instead of every
//! reordering turning into an `OutOfOrder` drop at the sequence tracker.
//!
//! Structured like the pack's per-sequence-number jitter buffer
//! (`media/rtp/src/session/jitter_buffer.rs`), adapted from a flat
//! sequence-number queue to groups keyed by RTP timestamp, since AV1
//! temporal units (not individual packets) are this crate's unit of
//! delivery.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

pub const DEFAULT_MAX_REORDER_BUFFER: usize = 10;
pub const DEFAULT_REORDER_TIMEOUT: Duration = Duration::from_millis(200);

/// One buffered packet, carrying everything [`crate::depayloader::Depayloader::push`]
/// needs to reprocess it once its group is released.
#[derive(Debug, Clone)]
pub struct BufferedPacket {
    pub sequence_number: u16,
    pub payload: Bytes,
    pub marker: bool,
    pub pts: u64,
}

struct TimestampGroup {
    timestamp: u32,
    packets: Vec<BufferedPacket>,
    saw_marker: bool,
    deadline: Instant,
}

/// Buffers packets grouped by RTP timestamp, releasing the oldest group
/// once it has either seen its marker packet (the group is presumably
/// complete), sat for `timeout`, or the buffer has grown past `max_depth`
/// groups.
pub struct ReorderBuffer {
    max_depth: usize,
    timeout: Duration,
    groups: VecDeque<TimestampGroup>,
}

impl ReorderBuffer {
    pub fn new(max_depth: usize, timeout: Duration) -> Self {
        ReorderBuffer {
            max_depth: max_depth.max(1),
            timeout,
            groups: VecDeque::new(),
        }
    }

    /// Inserts a packet now, keyed by its RTP timestamp. Packets within a
    /// group are kept sorted by sequence number.
    pub fn push(&mut self, timestamp: u32, sequence_number: u16, payload: Bytes, marker: bool, pts: u64) {
        let now = Instant::now();
        let entry = BufferedPacket {
            sequence_number,
            payload,
            marker,
            pts,
        };
        if let Some(group) = self.groups.iter_mut().find(|g| g.timestamp == timestamp) {
            let pos = group
                .packets
                .iter()
                .position(|p| p.sequence_number > sequence_number)
                .unwrap_or(group.packets.len());
            group.packets.insert(pos, entry);
            group.saw_marker |= marker;
        } else {
            let pos = self
                .groups
                .iter()
                .position(|g| timestamp_precedes(timestamp, g.timestamp))
                .unwrap_or(self.groups.len());
            self.groups.insert(
                pos,
                TimestampGroup {
                    timestamp,
                    packets: vec![entry],
                    saw_marker: marker,
                    deadline: now + self.timeout,
                },
            );
        }

        while self.groups.len() > self.max_depth {
            self.groups.pop_front();
        }
    }

    /// Pops the oldest group's packets in sequence-number order, if it has
    /// seen its marker packet with no gap left in the run leading up to
    /// it, timed out, or the buffer is over depth and must shed work (the
    /// latter two release whatever was collected even with gaps — this is
    /// elementary reordering, not loss recovery).
    pub fn pop_ready(&mut self) -> Option<(u32, Vec<BufferedPacket>)> {
        let now = Instant::now();
        let ready = self.groups.front().is_some_and(|g| {
            (g.saw_marker && is_contiguous(&g.packets))
                || now >= g.deadline
                || self.groups.len() > self.max_depth.saturating_sub(1)
        });
        if !ready {
            return None;
        }
        self.groups
            .pop_front()
            .map(|g| (g.timestamp, g.packets))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// True if `packets` (already sorted ascending by sequence number) has no
/// gaps: each entry is exactly one past its predecessor, wraparound-safe.
fn is_contiguous(packets: &[BufferedPacket]) -> bool {
    packets
        .windows(2)
        .all(|w| w[0].sequence_number.wrapping_add(1) == w[1].sequence_number)
}

/// True if `a` should be ordered before `b` in RTP timestamp space,
/// accounting for 32-bit wraparound the same way sequence numbers do.
fn timestamp_precedes(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[cfg(test)]
mod reorder_test {
    use super::*;

    fn payload(bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }

    #[test]
    fn groups_packets_by_timestamp() {
        let mut buf = ReorderBuffer::new(10, Duration::from_secs(5));
        buf.push(100, 1, payload(&[1]), false, 0);
        buf.push(100, 2, payload(&[2]), false, 0);
        buf.push(200, 3, payload(&[3]), true, 0);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn sorts_packets_within_a_group_by_sequence_number() {
        let mut buf = ReorderBuffer::new(10, Duration::from_millis(0));
        buf.push(100, 5, payload(&[5]), false, 0);
        buf.push(100, 3, payload(&[3]), false, 0);
        buf.push(100, 4, payload(&[4]), false, 0);
        let (timestamp, packets) = buf.pop_ready().expect("zero timeout group is immediately ready");
        assert_eq!(timestamp, 100);
        let seqs: Vec<u16> = packets.iter().map(|p| p.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn releases_group_as_soon_as_marker_packet_is_seen() {
        let mut buf = ReorderBuffer::new(10, Duration::from_secs(5));
        buf.push(100, 1, payload(&[1]), false, 0);
        assert!(buf.pop_ready().is_none());
        buf.push(100, 2, payload(&[2]), true, 0);
        let (timestamp, packets) = buf.pop_ready().expect("marker packet makes the group ready");
        assert_eq!(timestamp, 100);
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn evicts_oldest_group_past_max_depth() {
        let mut buf = ReorderBuffer::new(2, Duration::from_secs(5));
        buf.push(100, 1, payload(&[]), false, 0);
        buf.push(200, 2, payload(&[]), false, 0);
        buf.push(300, 3, payload(&[]), false, 0);
        assert_eq!(buf.len(), 2);
        assert!(buf
            .pop_ready()
            .map(|(ts, _)| ts == 200)
            .unwrap_or(false));
    }

    #[test]
    fn timestamp_wraparound_orders_correctly() {
        assert!(timestamp_precedes(u32::MAX, 0));
        assert!(!timestamp_precedes(0, u32::MAX));
    }
}
