//! Aggregator: merges received transmissions into the canonical store.
//!
//! Every packet is merged into a copy of the store. The copy replaces the
//! live store as soon as it is on disk, so memory never lags behind the
//! persisted store. The replay cache holds the team-scoped fingerprints of
//! accepted records, in the aggregator's own metric ids.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use relay_link::PacketSink;
use relay_merge::{CanonicalIdPolicy, CanonicalStore, LocalCache, MergeReport, Merger};
use relay_storage::{write_csv, Storage};
use std::path::Path;

/// Receiving end of the relay: owns the canonical store and its exports
pub struct Aggregator {
    store: CanonicalStore,
    replay: LocalCache,
    merger: Merger,
    storage: Storage,
}

impl Aggregator {
    /// Load the persisted store and replay cache
    pub async fn load(storage: Storage) -> Result<Self> {
        let store = storage
            .store
            .load()
            .await
            .with_context(|| format!("loading {}", storage.store.location()))?;
        let replay = storage
            .cache
            .load()
            .await
            .with_context(|| format!("loading {}", storage.cache.location()))?;

        crate::component_info!(
            "aggregator",
            "Loaded {} records for {} teams from {}",
            store.record_count(),
            store.teams.len(),
            storage.store.location()
        );

        Ok(Self {
            store,
            replay,
            // Sender ids are adopted as-is unless they clash with an existing name.
            merger: Merger::with_policy(CanonicalIdPolicy::RawId),
            storage,
        })
    }

    /// Current canonical store
    pub fn store(&self) -> &CanonicalStore {
        &self.store
    }

    /// Merge one transmission, persist, then export
    pub async fn ingest(&mut self, packet: &CanonicalStore, source: &str) -> Result<MergeReport> {
        let unnamed = packet.unnamed_ids();
        if !unnamed.is_empty() {
            crate::component_warn!(
                "aggregator",
                "Transmission from {} uses {} metric ids missing from its template",
                source,
                unnamed.len()
            );
        }

        let document = packet.to_source_document(source);
        let mut next = self.store.clone();
        let report = self
            .merger
            .apply(&mut next, &[document], Some(&self.replay.cache));

        self.storage
            .store
            .persist(&next)
            .await
            .with_context(|| format!("persisting {}", self.storage.store.location()))?;
        self.store = next;
        self.export();

        let mut replay = self.replay.clone();
        replay.cache.extend(report.accepted.iter().copied());
        replay.template = self.store.template.clone();
        self.storage
            .cache
            .persist(&replay)
            .await
            .with_context(|| format!("persisting {}", self.storage.cache.location()))?;
        self.replay = replay;

        crate::component_info!(
            "aggregator",
            "Merged transmission from {}: {} new, {} duplicate, {} previously received, {} rejected ({} records total)",
            source,
            report.appended,
            report.duplicates,
            report.previously_sent,
            report.rejected.len(),
            self.store.record_count()
        );
        Ok(report)
    }

    /// Ingest a saved store file, as written by the sender's `save`
    pub async fn import_file(&mut self, path: &Path) -> Result<MergeReport> {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let packet = CanonicalStore::from_payload(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest(&packet, &source).await
    }

    fn export(&self) {
        let Some(path) = &self.storage.export_path else {
            return;
        };
        if let Err(e) = write_csv(&self.store, path) {
            crate::component_error!("export", "CSV export failed: {}", e);
        }
    }
}

#[async_trait]
impl PacketSink for Aggregator {
    async fn deliver(&mut self, payload: Bytes) -> Result<()> {
        let packet = CanonicalStore::from_payload(&payload)?;
        crate::component_debug!(
            "aggregator",
            "Received {} records for {} teams",
            packet.record_count(),
            packet.teams.len()
        );
        self.ingest(&packet, "radio").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_merge::{MetricValue, Record, Template};
    use relay_storage::{
        CacheBackend, MemoryCache, MemoryStore, StorageError, StoreBackend, EXPORT_FILE,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Cache backend whose next persist fails
    #[derive(Clone, Default)]
    struct FlakyCache {
        inner: MemoryCache,
        fail_next: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CacheBackend for FlakyCache {
        async fn load(&self) -> Result<LocalCache, StorageError> {
            self.inner.load().await
        }

        async fn persist(&self, cache: &LocalCache) -> Result<(), StorageError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.persist(cache).await
        }

        fn location(&self) -> String {
            "flaky".to_string()
        }
    }

    fn storage(export_dir: Option<&Path>) -> Storage {
        Storage {
            store: Box::new(MemoryStore::new()),
            cache: Box::new(MemoryCache::new()),
            export_path: export_dir.map(|dir| dir.join(EXPORT_FILE)),
        }
    }

    /// A sender batch: team 254 scored 12 auto points
    fn transmission(points: i64) -> CanonicalStore {
        batch("254", "9c1f0d2a", "Auto Points", points)
    }

    /// A one-record batch for `team` using the sender id `id` for `name`
    fn batch(team: &str, id: &str, name: &str, value: i64) -> CanonicalStore {
        let mut template = Template::new();
        template.insert(id, name);
        let mut store = CanonicalStore::new();
        store.template = template;
        let mut record = Record::new();
        record.insert(id, value);
        store.bucket_mut(team).push(record);
        store
    }

    #[tokio::test]
    async fn test_deliver_merges_persists_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = Aggregator::load(storage(Some(dir.path()))).await.unwrap();

        let payload = transmission(12).to_payload().unwrap();
        aggregator.deliver(Bytes::from(payload)).await.unwrap();

        let store = aggregator.store();
        assert_eq!(store.record_count(), 1);
        let id = store.template.id_for("Auto Points").unwrap();
        assert_eq!(id, "9c1f0d2a");
        assert_eq!(
            store.bucket("254").unwrap().records()[0].get(id),
            Some(&MetricValue::Integer(12))
        );

        assert_eq!(&aggregator.storage.store.load().await.unwrap(), store);
        assert_eq!(aggregator.storage.cache.load().await.unwrap().cache.len(), 1);

        let csv = std::fs::read_to_string(dir.path().join(EXPORT_FILE)).unwrap();
        assert_eq!(csv, "\"Team Number\",\"Auto Points\"\r\n\"254\",\"12\"\r\n");
    }

    #[tokio::test]
    async fn test_retransmission_is_absorbed() {
        let mut aggregator = Aggregator::load(storage(None)).await.unwrap();
        let packet = transmission(12);

        let first = aggregator.ingest(&packet, "radio").await.unwrap();
        let second = aggregator.ingest(&packet, "radio").await.unwrap();
        assert_eq!(first.appended, 1);
        assert_eq!(second.appended, 0);
        assert_eq!(second.duplicates, 1);

        aggregator.ingest(&transmission(30), "radio").await.unwrap();
        assert_eq!(aggregator.store().bucket("254").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_leaves_store_untouched() {
        let mut aggregator = Aggregator::load(storage(None)).await.unwrap();
        aggregator
            .ingest(&transmission(12), "radio")
            .await
            .unwrap();

        let err = aggregator
            .deliver(Bytes::from_static(b"{\"teams\": {\"254\": [{\"a\"}"))
            .await;
        assert!(err.is_err());
        assert_eq!(aggregator.store().record_count(), 1);
        assert_eq!(
            aggregator.storage.store.load().await.unwrap().record_count(),
            1
        );
    }

    #[tokio::test]
    async fn test_import_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_scouts.json");
        std::fs::write(&path, transmission(12).to_payload().unwrap()).unwrap();

        let mut aggregator = Aggregator::load(storage(None)).await.unwrap();
        let report = aggregator.import_file(&path).await.unwrap();
        assert_eq!(report.appended, 1);

        assert!(aggregator
            .import_file(&dir.path().join("missing.json"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_loads_persisted_state() {
        let storage = storage(None);
        storage.store.persist(&transmission(12)).await.unwrap();

        let mut aggregator = Aggregator::load(storage).await.unwrap();
        assert_eq!(aggregator.store().record_count(), 1);
        let report = aggregator.ingest(&transmission(12), "radio").await.unwrap();
        assert_eq!(report.duplicates, 1);
    }

    #[tokio::test]
    async fn test_equal_scores_for_two_teams_are_both_kept() {
        let mut aggregator = Aggregator::load(storage(None)).await.unwrap();
        aggregator
            .ingest(&batch("254", "m0001", "Auto Points", 0), "radio")
            .await
            .unwrap();

        let report = aggregator
            .ingest(&batch("1678", "m0001", "Auto Points", 0), "radio")
            .await
            .unwrap();
        assert_eq!(report.appended, 1);
        assert_eq!(report.previously_sent, 0);
        assert_eq!(aggregator.store().bucket("1678").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remapped_sender_ids_do_not_hide_later_records() {
        let mut aggregator = Aggregator::load(storage(None)).await.unwrap();
        aggregator
            .ingest(&batch("254", "m0001", "Auto Points", 3), "tablet-y")
            .await
            .unwrap();
        // Another sender used the same id for a different metric.
        aggregator
            .ingest(&batch("254", "m0001", "Climb", 5), "tablet-x")
            .await
            .unwrap();
        assert_ne!(
            aggregator.store().template.id_for("Climb").map(String::as_str),
            Some("m0001")
        );

        let report = aggregator
            .ingest(&batch("254", "m0001", "Auto Points", 5), "tablet-y")
            .await
            .unwrap();
        assert_eq!(report.appended, 1);
        assert_eq!(aggregator.store().bucket("254").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_cache_persist_keeps_saved_records() {
        let store = MemoryStore::new();
        let cache = FlakyCache::default();
        let mut aggregator = Aggregator::load(Storage {
            store: Box::new(store.clone()),
            cache: Box::new(cache.clone()),
            export_path: None,
        })
        .await
        .unwrap();

        cache.fail_next.store(true, Ordering::SeqCst);
        assert!(aggregator.ingest(&transmission(12), "radio").await.is_err());
        assert_eq!(store.load().await.unwrap().record_count(), 1);
        assert_eq!(aggregator.store().record_count(), 1);

        aggregator.ingest(&transmission(30), "radio").await.unwrap();
        assert_eq!(store.load().await.unwrap().record_count(), 2);
        assert_eq!(cache.load().await.unwrap().cache.len(), 1);
    }
}
