use lockstep_state::source::{FrameIndex, SourceKind};

use crate::error::MediaError;
use crate::frame::Frame;
use crate::mocap::MocapReader;
use crate::video::VideoReader;

/// Random-access reader over one media file. Owned by the source's worker
/// thread; nothing else touches it.
pub enum FrameReader {
    Video(VideoReader),
    Mocap(MocapReader),
}

impl FrameReader {
    pub fn kind(&self) -> SourceKind {
        match self {
            FrameReader::Video(_) => SourceKind::Video,
            FrameReader::Mocap(_) => SourceKind::Mocap,
        }
    }

    pub fn length(&self) -> FrameIndex {
        match self {
            FrameReader::Video(r) => r.length(),
            FrameReader::Mocap(r) => r.length(),
        }
    }

    pub fn fps(&self) -> f64 {
        match self {
            FrameReader::Video(r) => r.fps(),
            FrameReader::Mocap(r) => r.fps(),
        }
    }

    pub fn frame_at(&mut self, index: FrameIndex) -> Result<Frame, MediaError> {
        match self {
            FrameReader::Video(r) => r.frame_at(index).map(Frame::Video),
            FrameReader::Mocap(r) => r.frame_at(index).map(Frame::Mocap),
        }
    }

    /// Placeholder rendered when a scrubbed-to frame cannot be read.
    pub fn blank_frame(&self) -> Frame {
        match self {
            FrameReader::Video(r) => {
                let (w, h) = r.dimensions();
                Frame::blank_video(w, h)
            }
            FrameReader::Mocap(_) => Frame::blank_mocap(),
        }
    }

    pub fn close(&mut self) {
        match self {
            FrameReader::Video(r) => r.close(),
            FrameReader::Mocap(r) => r.close(),
        }
    }
}
