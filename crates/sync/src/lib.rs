//! Lock-step playback of heterogeneous media sources.
//!
//! One source is the primary and defines the timeline; every other source
//! follows it through frame-rate translation. A scheduler thread meters
//! out per-source ticks from a shared virtual clock, each source renders
//! on its own worker thread, and the session collects the results.

mod events;
mod fair_queue;
mod mediator;
mod scheduler;
mod session;
mod source;

pub use events::SessionEvent;
pub use session::{Session, SyncError};

pub use lockstep_media::video::{VideoBackend, VideoCursor};
pub use lockstep_media::{Frame, MediaError};
pub use lockstep_state::source::{FrameIndex, SourceId, SourceKind, SourceMeta};
pub use lockstep_state::tuning::SyncTuning;
