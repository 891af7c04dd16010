//! Device polling loop.

use crate::{DeviceSource, SourceError};
use relay_merge::{LocalCache, SourceDocument};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// State shared by the watcher and the station
#[derive(Debug, Default)]
pub struct StationState {
    /// Latest parsed export per device serial
    pub devices: BTreeMap<String, SourceDocument>,
    /// Transmission cache and sender template
    pub cache: LocalCache,
}

impl StationState {
    /// Wrap state for sharing between tasks
    pub fn shared(cache: LocalCache) -> SharedState {
        Arc::new(Mutex::new(Self {
            devices: BTreeMap::new(),
            cache,
        }))
    }
}

/// Station state behind the single lock every operation takes
pub type SharedState = Arc<Mutex<StationState>>;

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Devices attached during the cycle
    pub attached: usize,
    /// Snapshots replaced
    pub updated: usize,
    /// Devices whose export could not be read or parsed
    pub unreadable: usize,
    /// Devices seen for the first time
    pub discovered: Vec<String>,
    /// Devices no longer attached
    pub detached: Vec<String>,
}

/// Keeps the latest export of every attached device in [`SharedState`]
pub struct DeviceWatcher {
    source: Arc<dyn DeviceSource>,
    state: SharedState,
    poll_interval: Duration,
    known: BTreeSet<String>,
}

impl DeviceWatcher {
    /// Create a watcher
    pub fn new(source: Arc<dyn DeviceSource>, state: SharedState, poll_interval: Duration) -> Self {
        Self {
            source,
            state,
            poll_interval,
            known: BTreeSet::new(),
        }
    }

    /// Poll every device once.
    ///
    /// The state lock is held for the whole cycle so a concurrent send never
    /// observes a half-updated snapshot map. A device whose export is
    /// missing or unparsable keeps its previous snapshot.
    pub async fn poll_once(&mut self) -> Result<WatchSummary, SourceError> {
        let mut state = self.state.lock().await;
        let devices = self.source.list_devices().await?;
        let mut summary = WatchSummary {
            attached: devices.len(),
            ..WatchSummary::default()
        };

        for device in &devices {
            if self.known.insert(device.serial.clone()) {
                info!("Discovered device {}", device);
                summary.discovered.push(device.serial.clone());
            }

            let text = match self.source.read_export(device).await {
                Ok(text) => text,
                Err(SourceError::NotFound(_)) => {
                    debug!("No export on {} yet", device);
                    summary.unreadable += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Could not read export from {}: {}", device, e);
                    summary.unreadable += 1;
                    continue;
                }
            };

            match SourceDocument::parse(device.serial.clone(), &text) {
                Ok(document) => {
                    state.devices.insert(device.serial.clone(), document);
                    summary.updated += 1;
                }
                Err(e) => {
                    warn!("Keeping previous snapshot of {}: {}", device, e);
                    summary.unreadable += 1;
                }
            }
        }

        let attached: BTreeSet<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
        self.known.retain(|serial| {
            if attached.contains(serial.as_str()) {
                true
            } else {
                info!("Device {} detached", serial);
                summary.detached.push(serial.clone());
                false
            }
        });

        Ok(summary)
    }

    /// Poll until the stop signal fires
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            "Watching {} every {:?}",
            self.source.describe(),
            self.poll_interval
        );
        loop {
            if *stop.borrow() {
                break;
            }
            if let Err(e) = self.poll_once().await {
                warn!("Device poll failed: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Device watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceHandle;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Devices keyed by serial; `None` means attached without an export
    #[derive(Default)]
    struct FakeSource {
        devices: StdMutex<BTreeMap<String, Option<String>>>,
    }

    impl FakeSource {
        fn set(&self, serial: &str, export: Option<&str>) {
            self.devices
                .lock()
                .unwrap()
                .insert(serial.to_string(), export.map(str::to_string));
        }

        fn detach(&self, serial: &str) {
            self.devices.lock().unwrap().remove(serial);
        }
    }

    #[async_trait]
    impl DeviceSource for FakeSource {
        async fn list_devices(&self) -> Result<Vec<DeviceHandle>, SourceError> {
            Ok(self
                .devices
                .lock()
                .unwrap()
                .keys()
                .map(DeviceHandle::new)
                .collect())
        }

        async fn read_export(&self, device: &DeviceHandle) -> Result<String, SourceError> {
            self.devices
                .lock()
                .unwrap()
                .get(&device.serial)
                .cloned()
                .flatten()
                .ok_or_else(|| SourceError::NotFound(device.serial.clone()))
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    const EXPORT: &str =
        r#"{"teams":{"254":[{"metrics":{"a1":{"name":"Auto Points","value":12}}}]}}"#;

    fn watcher() -> (Arc<FakeSource>, SharedState, DeviceWatcher) {
        let source = Arc::new(FakeSource::default());
        let state = StationState::shared(LocalCache::default());
        let watcher = DeviceWatcher::new(source.clone(), state.clone(), Duration::from_millis(1500));
        (source, state, watcher)
    }

    #[tokio::test]
    async fn test_poll_collects_snapshots() {
        let (source, state, mut watcher) = watcher();
        source.set("tablet-1", Some(EXPORT));
        source.set("tablet-2", None);

        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.attached, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.unreadable, 1);
        assert_eq!(summary.discovered, vec!["tablet-1", "tablet-2"]);

        let state = state.lock().await;
        assert_eq!(state.devices.len(), 1);
        assert_eq!(state.devices["tablet-1"].record_count(), 1);
    }

    #[tokio::test]
    async fn test_device_announced_once() {
        let (source, _state, mut watcher) = watcher();
        source.set("tablet-1", Some(EXPORT));

        assert_eq!(watcher.poll_once().await.unwrap().discovered.len(), 1);
        assert!(watcher.poll_once().await.unwrap().discovered.is_empty());

        source.detach("tablet-1");
        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.detached, vec!["tablet-1"]);

        source.set("tablet-1", Some(EXPORT));
        assert_eq!(
            watcher.poll_once().await.unwrap().discovered,
            vec!["tablet-1"]
        );
    }

    #[tokio::test]
    async fn test_bad_export_keeps_previous_snapshot() {
        let (source, state, mut watcher) = watcher();
        source.set("tablet-1", Some(EXPORT));
        watcher.poll_once().await.unwrap();

        source.set("tablet-1", Some("{\"teams\": {\"254\": [tru"));
        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.unreadable, 1);
        assert_eq!(state.lock().await.devices["tablet-1"].record_count(), 1);
    }

    #[tokio::test]
    async fn test_detached_snapshot_is_kept() {
        let (source, state, mut watcher) = watcher();
        source.set("tablet-1", Some(EXPORT));
        watcher.poll_once().await.unwrap();
        source.detach("tablet-1");
        watcher.poll_once().await.unwrap();

        assert!(state.lock().await.devices.contains_key("tablet-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped() {
        let (source, state, watcher) = watcher();
        source.set("tablet-1", Some(EXPORT));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(watcher.run(stop_rx));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(state.lock().await.devices.len(), 1);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
