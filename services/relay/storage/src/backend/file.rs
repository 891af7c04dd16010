//! File-based storage backend: one JSON document per file, replaced atomically

use crate::{CacheBackend, StorageError, StoreBackend};
use async_trait::async_trait;
use relay_merge::{CanonicalStore, LocalCache};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Canonical store persisted as a JSON file
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StoreBackend for FileStore {
    async fn load(&self) -> Result<CanonicalStore, StorageError> {
        let store: CanonicalStore = load_json(&self.path)?;
        info!(
            "Loaded {} records for {} teams from {}",
            store.record_count(),
            store.teams.len(),
            self.path.display()
        );
        Ok(store)
    }

    async fn persist(&self, store: &CanonicalStore) -> Result<(), StorageError> {
        write_json(&self.path, store)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Transmission or replay cache persisted as a JSON file
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    /// Create a cache backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CacheBackend for FileCache {
    async fn load(&self) -> Result<LocalCache, StorageError> {
        let cache: LocalCache = load_json(&self.path)?;
        info!(
            "Loaded {} seen fingerprints and {} metric names from {}",
            cache.cache.len(),
            cache.template.len(),
            self.path.display()
        );
        Ok(cache)
    }

    async fn persist(&self, cache: &LocalCache) -> Result<(), StorageError> {
        write_json(&self.path, cache)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Read a JSON document; a missing file yields the default value
fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StorageError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} does not exist yet, starting empty", path.display());
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&content).map_err(|e| {
        StorageError::Corruption(format!("Invalid JSON in {}: {}", path.display(), e))
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let content = serde_json::to_vec(value)?;
    write_atomic(path, &content)?;
    debug!("Persisted {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Replace `path` with `content` via a synced temp file in the same directory
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.as_file_mut().write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_merge::{Merger, Record, SourceDocument};

    fn sample_store() -> CanonicalStore {
        let doc = SourceDocument::parse(
            "tablet-1",
            r#"{"teams":{"254":[{"metrics":{"a":{"name":"Auto Points","value":12}}}]}}"#,
        )
        .unwrap();
        let mut store = CanonicalStore::new();
        Merger::default().apply(&mut store, &[doc], None);
        store
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("combined_scouts.json"));
        assert!(store.load().await.unwrap().is_empty());

        let cache = FileCache::new(dir.path().join("replay_cache.json"));
        assert_eq!(cache.load().await.unwrap(), LocalCache::default());
    }

    #[tokio::test]
    async fn test_store_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStore::new(dir.path().join("combined_scouts.json"));
        let store = sample_store();

        backend.persist(&store).await.unwrap();
        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded, store);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(backend.path()).unwrap()).unwrap();
        assert!(raw["teams"]["254"].is_array());
        assert!(raw["template"].is_object());
    }

    #[tokio::test]
    async fn test_persist_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStore::new(dir.path().join("combined_scouts.json"));
        backend.persist(&sample_store()).await.unwrap();
        backend.persist(&CanonicalStore::new()).await.unwrap();

        assert!(backend.load().await.unwrap().is_empty());
        // Only the target file remains; no temp files are left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_cache_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCache::new(dir.path().join("scouting_cache.json"));

        let mut record = Record::new();
        record.insert("m1", 4i64);
        let mut cache = LocalCache::default();
        cache.cache.mark_seen(record.fingerprint());
        cache.template.insert("m1", "Auto Points");

        backend.persist(&cache).await.unwrap();
        assert_eq!(backend.load().await.unwrap(), cache);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("combined_scouts.json");
        std::fs::write(&path, b"{\"teams\": [").unwrap();

        let err = FileStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }
}
