//! Events emitted across the depayloader's edges, and the telemetry
//! counters a host can read without this crate depending on a metrics
//! backend.

#[derive(Debug, Clone, PartialEq)]
pub enum DepayloadEvent {
    /// A fully reassembled temporal unit, ready for decode.
    TemporalUnit {
        bytes: bytes::Bytes,
        pts: u64,
        rtp_timestamp: u32,
        key_frame: bool,
    },
    /// Stream continuity was broken (loss, timeout, reset); downstream
    /// decoder state should not be trusted across this event.
    Discontinuity { reason: &'static str },
    /// A keyframe is needed to resume clean decode; fire-and-forget
    /// toward the media source.
    KeyframeRequest { reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub fragments_dropped: u64,
    pub packets_dropped: u64,
    pub layer_filtered: u64,
    pub keyframes_requested: u64,
    pub timeouts: u64,
}

impl Counters {
    pub fn record_fragment_dropped(&mut self) {
        self.fragments_dropped = self.fragments_dropped.saturating_add(1);
    }

    pub fn record_packet_dropped(&mut self) {
        self.packets_dropped = self.packets_dropped.saturating_add(1);
    }

    pub fn record_layer_filtered(&mut self) {
        self.layer_filtered = self.layer_filtered.saturating_add(1);
    }

    pub fn record_keyframe_requested(&mut self) {
        self.keyframes_requested = self.keyframes_requested.saturating_add(1);
    }

    pub fn record_timeout(&mut self) {
        self.timeouts = self.timeouts.saturating_add(1);
    }
}

#[cfg(test)]
mod event_test {
    use super::*;

    #[test]
    fn counters_saturate_instead_of_overflowing() {
        let mut c = Counters {
            fragments_dropped: u64::MAX,
            ..Default::default()
        };
        c.record_fragment_dropped();
        assert_eq!(c.fragments_dropped, u64::MAX);
    }

    #[test]
    fn counters_start_at_zero() {
        let c = Counters::default();
        assert_eq!(c.packets_dropped, 0);
        assert_eq!(c.timeouts, 0);
    }
}
