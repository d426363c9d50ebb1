use lockstep_state::source::{FrameIndex, UpdateReason};

/// What the session should do with a primary position report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediatorOutcome {
    /// Accepted: publish the new playhead.
    Advance(FrameIndex),
    /// Accepted, but the loop bound was reached: publish the position and
    /// scrub back to the loop start.
    Wrap {
        position: FrameIndex,
        restart: FrameIndex,
    },
    /// Out-of-sequence tick from around a scrub; drop it.
    Stale,
}

/// Translates user intent into canonical scrub targets and filters the
/// primary position stream. Ticks are accepted only when they extend the
/// cached playhead by exactly one; anything else is a leftover from before
/// a scrub.
pub(crate) struct Mediator {
    position: FrameIndex,
    length: FrameIndex,
    loop_bounds: Option<(FrameIndex, FrameIndex)>,
}

impl Mediator {
    pub fn new(length: FrameIndex) -> Self {
        Self {
            position: 0,
            length,
            loop_bounds: None,
        }
    }

    pub fn position(&self) -> FrameIndex {
        self.position
    }

    pub fn length(&self) -> FrameIndex {
        self.length
    }

    pub fn clamp_target(&self, target: FrameIndex) -> FrameIndex {
        target.min(self.length.saturating_sub(1))
    }

    /// Record that a scrub to `target` was issued; position reports are
    /// judged against this anchor from now on.
    pub fn anchor(&mut self, target: FrameIndex) {
        self.position = self.clamp_target(target);
    }

    pub fn skip_target(&self, delta: i64, step: u64) -> FrameIndex {
        let moved = self.position as i64 + delta.saturating_mul(step as i64);
        let end = self.length.saturating_sub(1) as i64;
        moved.clamp(0, end) as FrameIndex
    }

    pub fn set_loop(&mut self, lo: FrameIndex, hi: FrameIndex) -> bool {
        if lo > hi || hi >= self.length {
            return false;
        }
        self.loop_bounds = Some((lo, hi));
        true
    }

    pub fn clear_loop(&mut self) {
        self.loop_bounds = None;
    }

    pub fn loop_bounds(&self) -> Option<(FrameIndex, FrameIndex)> {
        self.loop_bounds
    }

    pub fn on_primary_advanced(
        &mut self,
        position: FrameIndex,
        reason: UpdateReason,
    ) -> MediatorOutcome {
        match reason {
            UpdateReason::Scrub => {
                // A scrub render re-anchors unconditionally.
                self.position = position;
                MediatorOutcome::Advance(position)
            }
            UpdateReason::Timeout => {
                if position != self.position + 1 {
                    return MediatorOutcome::Stale;
                }
                if let Some((lo, hi)) = self.loop_bounds {
                    if position >= hi {
                        // Do not advance past the bound; the wrap scrub
                        // will re-anchor at `lo`.
                        return MediatorOutcome::Wrap {
                            position,
                            restart: lo,
                        };
                    }
                }
                self.position = position;
                MediatorOutcome::Advance(position)
            }
        }
    }
}
