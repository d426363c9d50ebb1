use uuid::Uuid;

pub type FrameIndex = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = &self.0.as_simple().to_string()[..8];
        write!(f, "src-{short}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Video,
    Mocap,
}

/// Why a source was asked to render a new frame. ACKs carry the same
/// reason back so the scheduler can tell tick traffic from scrub traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    Timeout,
    Scrub,
}

/// Immutable per-source metadata published once the reader is open.
#[derive(Debug, Clone, Copy)]
pub struct SourceMeta {
    pub kind: SourceKind,
    pub fps: f64,
    pub length: FrameIndex,
}

/// Translate a primary frame index into a source's own index space.
pub fn translate_index(primary_index: FrameIndex, fps: f64, reference_fps: f64) -> FrameIndex {
    if reference_fps <= 0.0 {
        return primary_index;
    }
    (primary_index as f64 * fps / reference_fps).floor() as FrameIndex
}

/// The frame count beyond which a secondary must not advance because the
/// primary has ended.
pub fn adjusted_length(
    length: FrameIndex,
    fps: f64,
    reference_fps: f64,
    reference_length: FrameIndex,
) -> FrameIndex {
    if reference_fps <= 0.0 {
        return length;
    }
    let translated = (reference_length as f64 * fps / reference_fps).floor() as FrameIndex;
    translated.min(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_uses_rate_ratio() {
        assert_eq!(translate_index(90, 100.0, 30.0), 300);
        assert_eq!(translate_index(90, 30.0, 30.0), 90);
        assert_eq!(translate_index(91, 30.0, 100.0), 27);
    }

    #[test]
    fn adjusted_length_never_exceeds_own_length() {
        // Secondary at 100 fps, primary 600 frames at 30 fps: nominal cap 2000.
        assert_eq!(adjusted_length(1500, 100.0, 30.0, 600), 1500);
        assert_eq!(adjusted_length(5000, 100.0, 30.0, 600), 2000);
    }
}
