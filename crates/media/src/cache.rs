use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::MediaError;
use crate::mocap::{parse_lara_csv, MocapData};

/// An entry is refused outright when it alone would occupy more than this
/// share of the cache.
const REFUSE_FRACTION: f64 = 0.9;

struct CacheEntry {
    key: u64,
    data: Arc<MocapData>,
    bytes: usize,
}

struct CacheInner {
    /// LRU order: index 0 is the oldest-touched entry.
    entries: Vec<CacheEntry>,
    occupied: usize,
}

/// Shared store of parsed mocap sequences, deduplicated by content hash.
/// Guarded by one coarse mutex; readers hold `Arc<MocapData>` so an evicted
/// sequence lives until its last reader closes.
pub struct MocapCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl MocapCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: Vec::new(),
                occupied: 0,
            }),
            capacity: capacity_bytes,
        }
    }

    pub fn load(&self, path: &Path) -> Result<Arc<MocapData>, MediaError> {
        let raw = std::fs::read(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => MediaError::FileMissing(path.to_path_buf()),
            _ => MediaError::DecoderError(format!("{}: {err}", path.display())),
        })?;
        let key = content_hash(&raw);

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = inner.entries.iter().position(|e| e.key == key) {
            let entry = inner.entries.remove(pos);
            let data = entry.data.clone();
            inner.entries.push(entry);
            return Ok(data);
        }
        drop(inner);

        let text = String::from_utf8(raw).map_err(|_| {
            MediaError::FormatUnsupported(format!("{}: not UTF-8 text", path.display()))
        })?;
        let data = Arc::new(parse_lara_csv(&text)?);
        let bytes = data.byte_size();

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if bytes as f64 > self.capacity as f64 * REFUSE_FRACTION {
            log::debug!(
                "mocap cache refuses {} ({bytes} bytes, cap {})",
                path.display(),
                self.capacity
            );
            return Ok(data);
        }
        // A concurrent load of the same file may have won the race.
        if inner.entries.iter().all(|e| e.key != key) {
            inner.entries.push(CacheEntry {
                key,
                data: data.clone(),
                bytes,
            });
            inner.occupied += bytes;
            while inner.occupied > self.capacity && inner.entries.len() > 1 {
                let evicted = inner.entries.remove(0);
                log::debug!("mocap cache evicts entry of {} bytes", evicted.bytes);
                // Recompute rather than subtract, so occupancy cannot drift.
                inner.occupied = inner.entries.iter().map(|e| e.bytes).sum();
            }
        }
        Ok(data)
    }

    pub fn occupied_bytes(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).occupied
    }

    pub fn entry_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }
}

fn content_hash(raw: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(raw);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_temp_csv(name: &str, rows: usize, fill: f32) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "lockstep-cache-{}-{}-{name}.csv",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        for _ in 0..rows {
            let fields: Vec<String> = (0..132).map(|_| format!("{fill}")).collect();
            writeln!(file, "{}", fields.join(",")).unwrap();
        }
        path
    }

    #[test]
    fn same_content_is_shared() {
        let path = write_temp_csv("shared", 10, 1.0);
        let cache = MocapCache::new(1024 * 1024);
        let a = cache.load(&path).unwrap();
        let b = cache.load(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.entry_count(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn readers_get_independent_rows() {
        let path = write_temp_csv("rows", 4, 2.0);
        let cache = MocapCache::new(1024 * 1024);
        let reader_a = crate::mocap::MocapReader::open(&cache, &path, 100.0).unwrap();
        let reader_b = crate::mocap::MocapReader::open(&cache, &path, 100.0).unwrap();
        let mut row_a = reader_a.frame_at(1).unwrap();
        let row_b = reader_b.frame_at(1).unwrap();
        assert_eq!(row_a, row_b);
        row_a[0] = 42.0;
        assert_ne!(row_a[0], reader_b.frame_at(1).unwrap()[0]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn eviction_keeps_occupancy_under_cap() {
        // Each 10-row file is 10 * 132 * 4 = 5280 bytes.
        let cache = MocapCache::new(12_000);
        let mut paths = Vec::new();
        for i in 0..4 {
            let path = write_temp_csv(&format!("evict{i}"), 10, i as f32 + 1.5);
            cache.load(&path).unwrap();
            paths.push(path);
        }
        assert!(cache.occupied_bytes() <= 12_000);
        assert_eq!(cache.entry_count(), 2);
        for path in paths {
            let _ = std::fs::remove_file(&path);
        }
    }

    #[test]
    fn oversized_entry_is_refused_but_served() {
        let cache = MocapCache::new(1000);
        let path = write_temp_csv("huge", 10, 1.0);
        let data = cache.load(&path).unwrap();
        assert_eq!(data.frame_count(), 10);
        assert_eq!(cache.entry_count(), 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_reports_file_missing() {
        let cache = MocapCache::new(1000);
        let err = cache.load(Path::new("/nonexistent/file.csv")).unwrap_err();
        assert!(matches!(err, MediaError::FileMissing(_)));
    }
}
