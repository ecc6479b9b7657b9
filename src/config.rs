//! Typed configuration for the payloader and depayloader, with the
//! same tunables and defaults a host would expect to reconfigure at
//! runtime.

use crate::error::{Error, Result};
use crate::reorder::DEFAULT_MAX_REORDER_BUFFER;

pub const MIN_MTU: usize = 64;
pub const MAX_MTU: usize = 9000;
pub const AV1_CLOCK_RATE: u32 = 90_000;

/// Aggregation-header wire flavor. `Draft` is interop-only for peers that
/// still speak the pre-RFC 9628 one-byte `S E F C` layout; this crate
/// does not implement `Draft` encoding/decoding itself (see DESIGN.md),
/// it only carries the selector through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    Spec,
    Draft,
}

impl Default for HeaderMode {
    fn default() -> Self {
        HeaderMode::Spec
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayloaderConfig {
    pub mtu: usize,
    pub header_mode: HeaderMode,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub tu_aware: bool,
    pub validate: bool,
}

impl Default for PayloaderConfig {
    fn default() -> Self {
        PayloaderConfig {
            mtu: 1200,
            header_mode: HeaderMode::Spec,
            payload_type: 45,
            clock_rate: AV1_CLOCK_RATE,
            tu_aware: true,
            validate: true,
        }
    }
}

impl PayloaderConfig {
    pub fn new() -> Result<Self> {
        let config = PayloaderConfig::default();
        config.check_clock_rate()?;
        config.check_header_mode()?;
        Ok(config)
    }

    fn check_clock_rate(&self) -> Result<()> {
        if self.clock_rate != AV1_CLOCK_RATE {
            return Err(Error::UnsupportedClockRate(self.clock_rate));
        }
        Ok(())
    }

    /// `Draft` names the legacy pre-RFC-9628 one-byte `S E F C` aggregation
    /// header for interop bookkeeping only; this crate never encodes or
    /// decodes it (see DESIGN.md), so constructing a payloader configured
    /// for it is rejected rather than silently emitting the `Spec` layout.
    pub(crate) fn check_header_mode(&self) -> Result<()> {
        if self.header_mode == HeaderMode::Draft {
            return Err(Error::UnsupportedHeaderMode);
        }
        Ok(())
    }

    /// Clamps `mtu` into `[MIN_MTU, MAX_MTU]`, logging a warning if the
    /// requested value had to be adjusted. Intended for a live MTU-update
    /// notification arriving mid-stream (e.g. a path-MTU change).
    pub fn set_mtu(&mut self, mtu: usize) {
        let clamped = mtu.clamp(MIN_MTU, MAX_MTU);
        if clamped != mtu {
            log::warn!("requested mtu {mtu} clamped to {clamped}");
        }
        self.mtu = clamped;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepayloaderConfig {
    pub clock_rate: u32,
    pub require_sequence_header: bool,
    pub max_reorder_buffer: usize,
    pub max_temporal_id: Option<u8>,
    pub max_spatial_id: Option<u8>,
    pub fragment_timeout_ms: u64,
    pub max_access_unit_size: usize,
    pub max_fragment_size: usize,
    pub gap_threshold: u16,
}

impl Default for DepayloaderConfig {
    fn default() -> Self {
        DepayloaderConfig {
            clock_rate: AV1_CLOCK_RATE,
            require_sequence_header: true,
            max_reorder_buffer: DEFAULT_MAX_REORDER_BUFFER,
            max_temporal_id: None,
            max_spatial_id: None,
            fragment_timeout_ms: 500,
            max_access_unit_size: 10 * 1024 * 1024,
            max_fragment_size: 1024 * 1024,
            gap_threshold: crate::sequence::DEFAULT_GAP_THRESHOLD,
        }
    }
}

impl DepayloaderConfig {
    pub fn new() -> Result<Self> {
        let config = DepayloaderConfig::default();
        config.check_clock_rate()?;
        Ok(config)
    }

    fn check_clock_rate(&self) -> Result<()> {
        if self.clock_rate != AV1_CLOCK_RATE {
            return Err(Error::UnsupportedClockRate(self.clock_rate));
        }
        Ok(())
    }
}
