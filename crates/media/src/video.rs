use std::path::Path;
use std::time::Instant;

use lockstep_state::source::FrameIndex;

use crate::error::MediaError;

/// Decode cursor over one open video file. Implementations wrap whatever
/// decoding library the embedding application links; the synchronizer only
/// depends on this capability set.
///
/// `next_frame` returns the frame at the cursor and advances it by one;
/// `seek_frame` lands the cursor on `index` (keyframe seek plus decode) and
/// leaves it just past `index`.
pub trait VideoCursor: Send {
    fn length(&self) -> FrameIndex;
    fn fps(&self) -> f64;
    fn dimensions(&self) -> (u32, u32);
    fn seek_frame(&mut self, index: FrameIndex) -> Result<image::RgbaImage, MediaError>;
    fn next_frame(&mut self) -> Result<image::RgbaImage, MediaError>;
}

/// Factory for cursors, registered by the embedding application.
pub trait VideoBackend: Send + Sync {
    fn recognizes(&self, path: &Path) -> bool;
    fn open(&self, path: &Path) -> Result<Box<dyn VideoCursor>, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    Seek,
    Scan,
}

#[derive(Debug, Clone, Default)]
struct LatencyWindow {
    samples: Vec<f64>,
}

const LATENCY_WINDOW: usize = 8;

impl LatencyWindow {
    fn record(&mut self, value: f64) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

/// Scan-vs-seek decision state. The threshold adapts to observed latency:
/// when scanning turns out slower than seeking it shrinks, and when recent
/// forward jumps keep brushing against it it grows, within fixed bounds.
#[derive(Debug, Clone)]
pub struct SeekPolicy {
    threshold: u64,
    min: u64,
    max: u64,
    scan_ms: LatencyWindow,
    seek_ms: LatencyWindow,
    recent_deltas: LatencyWindow,
}

impl SeekPolicy {
    pub fn new(threshold: u64, min: u64, max: u64) -> Self {
        Self {
            threshold: threshold.clamp(min, max),
            min,
            max,
            scan_ms: LatencyWindow::default(),
            seek_ms: LatencyWindow::default(),
            recent_deltas: LatencyWindow::default(),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// `next` is the cursor's next undecoded index; `target` the requested
    /// frame. Forward jumps up to and including the threshold scan;
    /// backward requests always seek.
    pub fn choose(&self, next: FrameIndex, target: FrameIndex) -> FetchStrategy {
        if target < next {
            return FetchStrategy::Seek;
        }
        if target - next <= self.threshold {
            FetchStrategy::Scan
        } else {
            FetchStrategy::Seek
        }
    }

    pub fn observe(&mut self, strategy: FetchStrategy, delta: u64, elapsed_ms: f64) {
        match strategy {
            FetchStrategy::Scan => self.scan_ms.record(elapsed_ms),
            FetchStrategy::Seek => self.seek_ms.record(elapsed_ms),
        }
        self.recent_deltas.record(delta as f64);

        let scan = self.scan_ms.average();
        let seek = self.seek_ms.average();
        match (scan, seek) {
            (Some(scan), Some(seek)) if scan > seek => {
                self.threshold = self.threshold.saturating_sub(1).max(self.min);
            }
            _ => {
                let brushing = self
                    .recent_deltas
                    .average()
                    .is_some_and(|d| d + 2.0 >= self.threshold as f64);
                if brushing && self.threshold < self.max {
                    self.threshold += 1;
                }
            }
        }
    }

    pub fn snapshot(&self) -> SeekPolicySnapshot {
        SeekPolicySnapshot {
            threshold: self.threshold,
            scan_avg_ms: self.scan_ms.average(),
            seek_avg_ms: self.seek_ms.average(),
        }
    }
}

/// Diagnostics view of the adaptive policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekPolicySnapshot {
    pub threshold: u64,
    pub scan_avg_ms: Option<f64>,
    pub seek_avg_ms: Option<f64>,
}

/// Random-access adapter over a decode cursor. Keeps one cursor and decides
/// per request whether to scan forward (decode and discard) or seek.
pub struct VideoReader {
    cursor: Option<Box<dyn VideoCursor>>,
    next_index: FrameIndex,
    policy: SeekPolicy,
    length: FrameIndex,
    fps: f64,
    dimensions: (u32, u32),
}

impl VideoReader {
    pub fn open(backend: &dyn VideoBackend, path: &Path, policy: SeekPolicy) -> Result<Self, MediaError> {
        if !path.exists() {
            return Err(MediaError::FileMissing(path.to_path_buf()));
        }
        let cursor = backend.open(path)?;
        let length = cursor.length();
        let fps = cursor.fps();
        let dimensions = cursor.dimensions();
        if fps <= 0.0 || length == 0 {
            return Err(MediaError::FormatUnsupported(format!(
                "{}: no decodable video frames",
                path.display()
            )));
        }
        Ok(Self {
            cursor: Some(cursor),
            next_index: 0,
            policy,
            length,
            fps,
            dimensions,
        })
    }

    pub fn length(&self) -> FrameIndex {
        self.length
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn policy_snapshot(&self) -> SeekPolicySnapshot {
        self.policy.snapshot()
    }

    pub fn frame_at(&mut self, index: FrameIndex) -> Result<image::RgbaImage, MediaError> {
        let cursor = self.cursor.as_mut().ok_or(MediaError::ReaderClosed)?;
        if index >= self.length {
            return Err(MediaError::DecoderError(format!(
                "frame {index} out of range (length {})",
                self.length
            )));
        }

        let strategy = self.policy.choose(self.next_index, index);
        let delta = index.saturating_sub(self.next_index);
        let started = Instant::now();

        let result = match strategy {
            FetchStrategy::Seek => cursor.seek_frame(index),
            FetchStrategy::Scan => {
                let mut frame = cursor.next_frame();
                for _ in 0..delta {
                    if frame.is_err() {
                        break;
                    }
                    frame = cursor.next_frame();
                }
                frame
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.policy.observe(strategy, delta, elapsed_ms);

        match result {
            Ok(frame) => {
                self.next_index = index + 1;
                Ok(frame)
            }
            Err(err) => {
                // Cursor position is unknown after a failed read; force the
                // next request onto the seek path.
                self.next_index = FrameIndex::MAX;
                Err(err)
            }
        }
    }

    pub fn close(&mut self) {
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingCursor {
        length: FrameIndex,
        seeks: Arc<AtomicU64>,
        decodes: Arc<AtomicU64>,
        next: FrameIndex,
    }

    impl VideoCursor for CountingCursor {
        fn length(&self) -> FrameIndex {
            self.length
        }
        fn fps(&self) -> f64 {
            30.0
        }
        fn dimensions(&self) -> (u32, u32) {
            (4, 4)
        }
        fn seek_frame(&mut self, index: FrameIndex) -> Result<image::RgbaImage, MediaError> {
            self.seeks.fetch_add(1, Ordering::Relaxed);
            self.next = index + 1;
            Ok(image::RgbaImage::new(4, 4))
        }
        fn next_frame(&mut self) -> Result<image::RgbaImage, MediaError> {
            self.decodes.fetch_add(1, Ordering::Relaxed);
            self.next += 1;
            Ok(image::RgbaImage::new(4, 4))
        }
    }

    struct CountingBackend {
        seeks: Arc<AtomicU64>,
        decodes: Arc<AtomicU64>,
    }

    impl VideoBackend for CountingBackend {
        fn recognizes(&self, _path: &Path) -> bool {
            true
        }
        fn open(&self, _path: &Path) -> Result<Box<dyn VideoCursor>, MediaError> {
            Ok(Box::new(CountingCursor {
                length: 600,
                seeks: self.seeks.clone(),
                decodes: self.decodes.clone(),
                next: 0,
            }))
        }
    }

    fn reader_with_counters() -> (VideoReader, Arc<AtomicU64>, Arc<AtomicU64>) {
        let seeks = Arc::new(AtomicU64::new(0));
        let decodes = Arc::new(AtomicU64::new(0));
        let backend = CountingBackend {
            seeks: seeks.clone(),
            decodes: decodes.clone(),
        };
        // Existing file path: the backend ignores it.
        let reader = VideoReader::open(
            &backend,
            Path::new("/"),
            SeekPolicy::new(8, 3, 15),
        )
        .unwrap();
        (reader, seeks, decodes)
    }

    #[test]
    fn sequential_reads_scan() {
        let (mut reader, seeks, decodes) = reader_with_counters();
        for i in 0..10 {
            reader.frame_at(i).unwrap();
        }
        assert_eq!(seeks.load(Ordering::Relaxed), 0);
        assert_eq!(decodes.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn backward_jump_seeks() {
        let (mut reader, seeks, _) = reader_with_counters();
        reader.frame_at(50).unwrap();
        reader.frame_at(10).unwrap();
        assert_eq!(seeks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn far_forward_jump_seeks() {
        let (mut reader, seeks, decodes) = reader_with_counters();
        reader.frame_at(0).unwrap();
        reader.frame_at(500).unwrap();
        assert_eq!(seeks.load(Ordering::Relaxed), 1);
        assert_eq!(decodes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn closed_reader_refuses_reads() {
        let (mut reader, _, _) = reader_with_counters();
        reader.close();
        assert!(matches!(reader.frame_at(0), Err(MediaError::ReaderClosed)));
        // close is idempotent
        reader.close();
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let (mut reader, _, _) = reader_with_counters();
        assert!(matches!(
            reader.frame_at(600),
            Err(MediaError::DecoderError(_))
        ));
    }

    #[test]
    fn jump_equal_to_threshold_still_scans() {
        let policy = SeekPolicy::new(8, 3, 15);
        assert_eq!(policy.choose(0, 8), FetchStrategy::Scan);
        assert_eq!(policy.choose(0, 9), FetchStrategy::Seek);
        assert_eq!(policy.choose(10, 5), FetchStrategy::Seek);
    }

    #[test]
    fn policy_snapshot_reports_observed_latency() {
        let (mut reader, _, _) = reader_with_counters();
        reader.frame_at(0).unwrap();
        reader.frame_at(1).unwrap();
        let snap = reader.policy_snapshot();
        assert_eq!(snap.threshold, 8);
        assert!(snap.scan_avg_ms.is_some());
        assert!(snap.seek_avg_ms.is_none());
    }

    #[test]
    fn slow_scans_shrink_the_threshold() {
        let mut policy = SeekPolicy::new(8, 3, 15);
        for _ in 0..LATENCY_WINDOW {
            policy.observe(FetchStrategy::Seek, 20, 5.0);
            policy.observe(FetchStrategy::Scan, 2, 50.0);
        }
        assert!(policy.threshold() < 8);
        assert!(policy.threshold() >= 3);
    }

    #[test]
    fn near_threshold_deltas_grow_the_threshold() {
        let mut policy = SeekPolicy::new(8, 3, 15);
        for _ in 0..LATENCY_WINDOW {
            policy.observe(FetchStrategy::Scan, 7, 2.0);
        }
        assert!(policy.threshold() > 8);
        assert!(policy.threshold() <= 15);
    }
}
