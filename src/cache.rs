//! Cache stores
//!
//! A node's memoized result lives behind a [`CacheStore`]. The node keeps
//! the `already_cached` flag; the store only holds bytes. Every failure of the
//! underlying medium is reported as [`PipelineError::StorageUnavailable`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::Fingerprint;
use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};

/// Capability interface for persisting one node result
pub trait CacheStore: fmt::Debug {
    fn write(&mut self, data: &Dataset) -> Result<()>;
    fn read(&self) -> Result<Dataset>;
    fn clear(&mut self) -> Result<()>;
}

/// Which store a node gets when it does not bring its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Nodes recompute on every evaluation
    Disabled,
    #[default]
    Memory,
    File,
}

/// Store for nodes with caching disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheStore for NoCache {
    fn write(&mut self, _data: &Dataset) -> Result<()> {
        Ok(())
    }

    fn read(&self) -> Result<Dataset> {
        Err(PipelineError::StorageUnavailable(
            "no cache store configured".to_string(),
        ))
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Holds the result in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    slot: Option<Dataset>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn write(&mut self, data: &Dataset) -> Result<()> {
        self.slot = Some(data.clone());
        Ok(())
    }

    fn read(&self) -> Result<Dataset> {
        self.slot
            .clone()
            .ok_or_else(|| PipelineError::StorageUnavailable("memory cache is empty".to_string()))
    }

    fn clear(&mut self) -> Result<()> {
        self.slot = None;
        Ok(())
    }
}

/// On-disk envelope written by [`FileCache`]
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    fingerprint: Fingerprint,
    written_at: DateTime<Utc>,
    dataset: Dataset,
}

/// Persists the result as a JSON file, verified by fingerprint on read
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, action: &str, err: impl fmt::Display) -> PipelineError {
        PipelineError::StorageUnavailable(format!(
            "cannot {} {}: {}",
            action,
            self.path.display(),
            err
        ))
    }
}

impl CacheStore for FileCache {
    fn write(&mut self, data: &Dataset) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.unavailable("create directory for", e))?;
        }
        let entry = CacheEntry {
            fingerprint: data.fingerprint(),
            written_at: Utc::now(),
            dataset: data.clone(),
        };
        let content = serde_json::to_string(&entry).map_err(|e| self.unavailable("encode", e))?;
        fs::write(&self.path, content).map_err(|e| self.unavailable("write", e))
    }

    fn read(&self) -> Result<Dataset> {
        let content = fs::read_to_string(&self.path).map_err(|e| self.unavailable("read", e))?;
        let entry: CacheEntry =
            serde_json::from_str(&content).map_err(|e| self.unavailable("decode", e))?;
        if !entry.fingerprint.verify(&entry.dataset) {
            return Err(self.unavailable(
                "verify",
                format!("fingerprint mismatch (written {})", entry.written_at),
            ));
        }
        Ok(entry.dataset)
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.unavailable("remove", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> Dataset {
        Dataset::from_rows(["x"], vec![vec![json!(1)], vec![json!(2)]]).unwrap()
    }

    #[test]
    fn test_no_cache_never_reads() {
        let mut store = NoCache;
        store.write(&sample()).unwrap();
        assert!(matches!(store.read(), Err(PipelineError::StorageUnavailable(_))));
        store.clear().unwrap();
    }

    #[test]
    fn test_memory_cache_lifecycle() {
        let mut store = MemoryCache::new();
        assert!(store.read().is_err());
        store.write(&sample()).unwrap();
        assert_eq!(store.read().unwrap(), sample());
        store.clear().unwrap();
        assert!(store.read().is_err());
    }

    #[test]
    fn test_file_cache_lifecycle() {
        let dir = tempdir().unwrap();
        let mut store = FileCache::new(dir.path().join("nested/node-0.json"));

        store.write(&sample()).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.read().unwrap(), sample());

        store.clear().unwrap();
        assert!(!store.path().exists());
        assert!(matches!(store.read(), Err(PipelineError::StorageUnavailable(_))));
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_file_cache_detects_tampering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.json");
        let mut store = FileCache::new(&path);
        store.write(&sample()).unwrap();

        let mut entry: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        entry["dataset"]["rows"][0][0] = json!(99);
        fs::write(&path, entry.to_string()).unwrap();

        let err = store.read().unwrap_err();
        assert!(err.to_string().contains("fingerprint mismatch"));
    }
}
