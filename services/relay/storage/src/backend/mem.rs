//! In-memory storage backend for dry runs and testing

use crate::{CacheBackend, StorageError, StoreBackend};
use async_trait::async_trait;
use relay_merge::{CanonicalStore, LocalCache};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory canonical store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<CanonicalStore>>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn load(&self) -> Result<CanonicalStore, StorageError> {
        Ok(self.inner.read().await.clone())
    }

    async fn persist(&self, store: &CanonicalStore) -> Result<(), StorageError> {
        *self.inner.write().await = store.clone();
        debug!("Stored {} records in memory", store.record_count());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// In-memory transmission or replay cache
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<LocalCache>>,
}

impl MemoryCache {
    /// Create an empty in-memory cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn load(&self) -> Result<LocalCache, StorageError> {
        Ok(self.inner.read().await.clone())
    }

    async fn persist(&self, cache: &LocalCache) -> Result<(), StorageError> {
        *self.inner.write().await = cache.clone();
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
