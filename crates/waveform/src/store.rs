use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::PeakSummary;

const EXTENSION: &str = "peaks";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),
}

/// Identity of a file on disk. A summary is reused only while all three match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified: u64,
}

impl CacheKey {
    pub fn for_file(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        Ok(Self {
            path: path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
            size: meta.len(),
            modified,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct Entry {
    key: CacheKey,
    summary: PeakSummary,
}

/// Completed summaries persisted as MessagePack, one file per source.
#[derive(Debug, Clone)]
pub struct SummaryStore {
    dir: PathBuf,
    max_entries: usize,
}

impl SummaryStore {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            dir: dir.into(),
            max_entries,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey, block_frames: usize, fan_in: usize) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        block_frames.hash(&mut hasher);
        fan_in.hash(&mut hasher);
        self.dir.join(format!("{:016x}.{EXTENSION}", hasher.finish()))
    }

    /// Stored summary for `key` with the given layout, if any.
    pub fn load(
        &self,
        key: &CacheKey,
        block_frames: usize,
        fan_in: usize,
    ) -> Result<Option<PeakSummary>, StoreError> {
        let path = self.entry_path(key, block_frames, fan_in);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: Entry = rmp_serde::decode::from_slice(&bytes)?;
        let summary = entry.summary;
        if entry.key != *key
            || summary.block_frames() != block_frames
            || summary.fan_in() != fan_in
            || !summary.is_complete()
        {
            return Ok(None);
        }

        let mut summary = summary;
        summary.restore();
        Ok(Some(summary))
    }

    /// Persist a completed summary, then prune the oldest entries.
    pub fn save(&self, key: &CacheKey, summary: &PeakSummary) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let entry = Entry {
            key: key.clone(),
            summary: summary.clone(),
        };
        let bytes = rmp_serde::encode::to_vec(&entry)?;

        let path = self.entry_path(key, summary.block_frames(), summary.fan_in());
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;

        self.prune()?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(PathBuf, std::time::SystemTime)>, StoreError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry?.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                let modified = fs::metadata(&path)?.modified()?;
                entries.push((path, modified));
            }
        }
        Ok(entries)
    }

    /// Keep the newest `max_entries` files. Returns how many were removed.
    pub fn prune(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries()?;
        if entries.len() <= self.max_entries {
            return Ok(0);
        }

        entries.sort_by(|a, b| b.1.cmp(&a.1));
        let stale = entries.split_off(self.max_entries);
        for (path, _) in &stale {
            fs::remove_file(path)?;
        }
        log::debug!("pruned {} cached summaries", stale.len());
        Ok(stale.len())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        for (path, _) in self.entries()? {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn summary(frames: usize) -> PeakSummary {
        let samples: Vec<f32> = (0..frames).map(|i| ((i % 100) as f32 - 50.0) / 50.0).collect();
        let mut summary = PeakSummary::new(16, 8, 1, 44100, frames as u64);
        summary.append(&samples);
        summary.finish();
        summary
    }

    fn key(name: &str, modified: u64) -> CacheKey {
        CacheKey {
            path: PathBuf::from(name),
            size: 1000,
            modified,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = SummaryStore::new(dir.path(), 8);
        let original = summary(5000);

        store.save(&key("a.wav", 1), &original).unwrap();
        let loaded = store.load(&key("a.wav", 1), 16, 8).unwrap().unwrap();

        assert_eq!(loaded, original);
        assert_eq!(loaded.query(0.0, 5000.0, 50), original.query(0.0, 5000.0, 50));
    }

    #[test]
    fn test_changed_file_misses() {
        let dir = TempDir::new().unwrap();
        let store = SummaryStore::new(dir.path(), 8);
        store.save(&key("a.wav", 1), &summary(5000)).unwrap();

        assert!(store.load(&key("a.wav", 2), 16, 8).unwrap().is_none());
        assert!(store.load(&key("b.wav", 1), 16, 8).unwrap().is_none());
        assert!(store.load(&key("a.wav", 1), 32, 8).unwrap().is_none());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SummaryStore::new(dir.path().join("nope"), 8);
        assert!(store.load(&key("a.wav", 1), 16, 8).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = SummaryStore::new(dir.path(), 2);
        let s = summary(1000);

        for i in 0..4 {
            store.save(&key(&format!("{i}.wav"), 1), &s).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(store.len().unwrap(), 2);
        assert!(store.load(&key("3.wav", 1), 16, 8).unwrap().is_some());
        assert!(store.load(&key("0.wav", 1), 16, 8).unwrap().is_none());
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = SummaryStore::new(dir.path(), 8);
        let k = key("a.wav", 1);
        fs::write(store.entry_path(&k, 16, 8), b"not msgpack").unwrap();

        assert!(matches!(
            store.load(&k, 16, 8),
            Err(StoreError::Deserialize(_))
        ));
    }
}
