use lockstep_media::{Frame, MediaError};
use lockstep_state::source::{FrameIndex, SourceId, UpdateReason};

/// Events surfaced to the embedding application through
/// `Session::pump_events`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A source finished rendering a frame.
    FrameReady {
        source: SourceId,
        position: FrameIndex,
        frame: Frame,
    },
    /// The canonical playhead moved. Emitted only for accepted primary
    /// updates; stale ticks around a scrub are filtered out.
    PrimaryPositionChanged { frame: FrameIndex },
    SourceLoaded { source: SourceId },
    SourceFailed { source: SourceId, error: MediaError },
}

/// Raw worker-to-session traffic, before the mediator has filtered it.
#[derive(Debug, Clone)]
pub(crate) enum SourceEvent {
    FrameReady {
        source: SourceId,
        position: FrameIndex,
        frame: Frame,
    },
    PrimaryAdvanced {
        position: FrameIndex,
        reason: UpdateReason,
    },
    Failed {
        source: SourceId,
        error: MediaError,
    },
}
