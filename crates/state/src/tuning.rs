use std::path::Path;

use serde::Deserialize;

/// Tunable knobs for the synchronizer. Defaults match the values the
/// scheduler was calibrated with; an annotation tool can override them
/// from a JSON settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Upper bound on un-ACKed ticks across all sources.
    pub max_in_flight: usize,
    /// Scheduler sleep while waiting on scrub ACKs, milliseconds.
    pub idle_active_ms: u64,
    /// Scheduler sleep when paused or without subscribers, milliseconds.
    pub idle_passive_ms: u64,
    /// Queue length at which the pacing factor reaches its floor.
    pub queue_max: usize,
    /// Floor for the pacing factor.
    pub alpha_epsilon: f64,
    /// Initial scan-vs-seek threshold for video readers, in frames.
    pub scan_threshold: u64,
    pub scan_threshold_min: u64,
    pub scan_threshold_max: u64,
    /// Byte cap for the shared mocap cache.
    pub mocap_cache_bytes: usize,
    /// Frame rate assumed for mocap files, which do not encode one.
    pub mocap_fps: f64,
    /// Frame deltas for skip(delta, fast): slow and fast step sizes.
    pub skip_small: u64,
    pub skip_big: u64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            max_in_flight: 10,
            idle_active_ms: 5,
            idle_passive_ms: 50,
            queue_max: 50,
            alpha_epsilon: 1e-3,
            scan_threshold: 8,
            scan_threshold_min: 3,
            scan_threshold_max: 15,
            mocap_cache_bytes: 256 * 1024 * 1024,
            mocap_fps: 100.0,
            skip_small: 1,
            skip_big: 100,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TuningError {
    #[error("cannot read tuning file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed tuning file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl SyncTuning {
    pub fn from_json_file(path: &Path) -> Result<Self, TuningError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let tuning: SyncTuning = serde_json::from_str(r#"{"max_in_flight": 4}"#).unwrap();
        assert_eq!(tuning.max_in_flight, 4);
        assert_eq!(tuning.queue_max, SyncTuning::default().queue_max);
    }
}
