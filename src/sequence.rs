//! RTP sequence-number tracking and the aggregation header's `W`-bit
//! (fragment-in-progress) state machine, both on the depayloader's
//! receive side.
//!
//! Wraparound-safe comparison follows the same signed-16-bit-difference
//! idiom RFC 3550 jitter buffers use for receive-side sequence tracking.

/// Default gap size beyond which an advance is treated as a loss of
/// synchronization rather than ordinary reordering/loss.
pub const DEFAULT_GAP_THRESHOLD: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// First packet ever seen, or advanced by exactly 1.
    Ok,
    /// Exact repeat of the last sequence number.
    Duplicate,
    /// Behind `last_seq` by a small amount (reordering).
    OutOfOrder,
    /// Advanced by more than the configured gap threshold.
    LargeGap,
}

/// Signed difference `a - b` over 16-bit wraparound space, in `i32` so the
/// full range fits without overflow.
pub(crate) fn wrapping_diff(a: u16, b: u16) -> i32 {
    let diff = a.wrapping_sub(b) as i16;
    diff as i32
}

#[derive(Debug, Clone)]
pub struct SequenceTracker {
    last_seq: Option<u16>,
    gap_threshold: u16,
}

impl SequenceTracker {
    pub fn new(gap_threshold: u16) -> Self {
        SequenceTracker {
            last_seq: None,
            gap_threshold,
        }
    }

    pub fn last_seq(&self) -> Option<u16> {
        self.last_seq
    }

    /// Feeds the next observed sequence number and classifies it relative
    /// to the tracker's state, then updates `last_seq` for any outcome
    /// that advances the stream (`Ok` or `LargeGap`).
    pub fn observe(&mut self, seq: u16) -> SequenceOutcome {
        let Some(last) = self.last_seq else {
            self.last_seq = Some(seq);
            return SequenceOutcome::Ok;
        };

        let diff = wrapping_diff(seq, last);
        let outcome = if diff == 0 {
            SequenceOutcome::Duplicate
        } else if diff < 0 {
            SequenceOutcome::OutOfOrder
        } else if diff == 1 {
            SequenceOutcome::Ok
        } else if diff as i64 > self.gap_threshold as i64 {
            SequenceOutcome::LargeGap
        } else {
            SequenceOutcome::Ok
        };

        if matches!(outcome, SequenceOutcome::Ok | SequenceOutcome::LargeGap) {
            self.last_seq = Some(seq);
        }
        outcome
    }

    pub fn reset(&mut self) {
        self.last_seq = None;
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        SequenceTracker::new(DEFAULT_GAP_THRESHOLD)
    }
}

/// Tracks whether an OBU fragment is in progress, validating the
/// aggregation header's `W` field against its legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WState {
    Idle,
    InFragment,
}

impl Default for WState {
    fn default() -> Self {
        WState::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WTransition {
    /// Transition is legal; `next` is the resulting state.
    Accepted { next: WState },
    /// Transition is illegal; caller must reset fragment state to `Idle`.
    Rejected,
}

/// What a packet's `(Z, Y)` pair says about fragment progression,
/// independent of the `W` element count. Derived by the caller from the
/// aggregation header before calling [`WState::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentEdge {
    /// `Z=0, Y=0`: no fragment touches this packet.
    None,
    /// `Z=0, Y=1`: first fragment of a new OBU.
    Start,
    /// `Z=1, Y=1`: middle fragment, sequence continues.
    Continue,
    /// `Z=1, Y=0`: last fragment, sequence completes.
    Complete,
}

impl FragmentEdge {
    pub fn from_z_y(z: bool, y: bool) -> Self {
        match (z, y) {
            (false, false) => FragmentEdge::None,
            (false, true) => FragmentEdge::Start,
            (true, true) => FragmentEdge::Continue,
            (true, false) => FragmentEdge::Complete,
        }
    }
}

impl WState {
    /// Validates `edge` against the current state's legal-transition
    /// table: `Idle` accepts `None` (stay) or `Start`
    /// (enter fragment); `InFragment` accepts `Continue` (stay) or
    /// `Complete` (return to idle). Anything else is rejected and the
    /// caller must reset to `Idle`, discarding accumulated fragment bytes.
    pub fn advance(self, edge: FragmentEdge) -> WTransition {
        use FragmentEdge::*;
        match (self, edge) {
            (WState::Idle, None) => WTransition::Accepted { next: WState::Idle },
            (WState::Idle, Start) => WTransition::Accepted {
                next: WState::InFragment,
            },
            (WState::InFragment, Continue) => WTransition::Accepted {
                next: WState::InFragment,
            },
            (WState::InFragment, Complete) => WTransition::Accepted { next: WState::Idle },
            _ => WTransition::Rejected,
        }
    }
}
