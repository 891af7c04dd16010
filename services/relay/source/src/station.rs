//! Sender station operations.
//!
//! The station owns everything the operator commands act on: the shared
//! device snapshots, the merger, the framing and transport settings, the
//! link opener and the sender's persisted files.
//!
//! `send` drains the snapshot map, merges it against the transmission cache
//! and transmits only records never sent before. Fingerprints are committed
//! to the cache after the aggregator acknowledged every chunk; a failed send
//! commits nothing, and the next poll re-reads the full device exports.

use crate::{SharedState, SourceError};
use async_trait::async_trait;
use relay_link::{
    ByteChannel, ChunkedSender, LinkError, MockChannel, PortSelector, SendReport, SerialChannel,
};
use relay_merge::{CanonicalStore, MergeReport, Merger, SourceDocument};
use relay_storage::Storage;
use relay_wire::Framer;
use tracing::{debug, info, warn};

/// Opens the outbound link for one transmission
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Open a fresh channel
    async fn open(&self) -> Result<Box<dyn ByteChannel>, LinkError>;
}

/// Opens the serial port of the radio bridge
pub struct SerialOpener {
    selector: PortSelector,
    baud_rate: u32,
}

impl SerialOpener {
    /// Create an opener
    pub fn new(selector: PortSelector, baud_rate: u32) -> Self {
        Self {
            selector,
            baud_rate,
        }
    }
}

#[async_trait]
impl LinkOpener for SerialOpener {
    async fn open(&self) -> Result<Box<dyn ByteChannel>, LinkError> {
        let path = if self.selector.is_auto() {
            let selector = self.selector.clone();
            tokio::task::spawn_blocking(move || selector.find())
                .await
                .map_err(|e| LinkError::Task(e.to_string()))??
                .ok_or_else(|| {
                    LinkError::Unavailable(format!(
                        "no serial port matching '{}'",
                        self.selector.filter
                    ))
                })?
        } else {
            self.selector.address.clone()
        };

        let baud_rate = self.baud_rate;
        let channel = tokio::task::spawn_blocking(move || SerialChannel::open(&path, baud_rate))
            .await
            .map_err(|e| LinkError::Task(e.to_string()))??;
        Ok(Box::new(channel))
    }
}

/// Hands out clones of an in-memory channel, for dry runs
pub struct MockOpener(MockChannel);

impl MockOpener {
    /// Open `channel` for every transmission
    pub fn new(channel: MockChannel) -> Self {
        Self(channel)
    }
}

#[async_trait]
impl LinkOpener for MockOpener {
    async fn open(&self) -> Result<Box<dyn ByteChannel>, LinkError> {
        Ok(Box::new(self.0.clone()))
    }
}

/// Result of a `send` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every collected record was already sent
    NothingNew,
    /// A packet was transmitted and acknowledged
    Sent {
        /// Records in the packet
        records: usize,
        /// Transport statistics
        report: SendReport,
    },
}

/// Result of a `save` command
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Merge statistics against the saved store
    pub merge: MergeReport,
    /// Records in the saved store afterwards
    pub total_records: usize,
    /// Where the store was written
    pub location: String,
}

/// The sender side of the relay
pub struct SenderStation {
    state: SharedState,
    merger: Merger,
    framer: Framer,
    transport: ChunkedSender,
    opener: Box<dyn LinkOpener>,
    storage: Storage,
}

impl SenderStation {
    /// Create a station
    pub fn new(
        state: SharedState,
        merger: Merger,
        framer: Framer,
        transport: ChunkedSender,
        opener: Box<dyn LinkOpener>,
        storage: Storage,
    ) -> Self {
        Self {
            state,
            merger,
            framer,
            transport,
            opener,
            storage,
        }
    }

    /// Shared state handle, for the watcher
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Transmit every record not sent before
    pub async fn send(&self) -> Result<SendOutcome, SourceError> {
        let (mut batch, merge) = {
            let mut state = self.state.lock().await;
            let sources: Vec<SourceDocument> =
                std::mem::take(&mut state.devices).into_values().collect();

            let mut batch = CanonicalStore::new();
            batch.template = state.cache.template.clone();
            let merge = self
                .merger
                .apply(&mut batch, &sources, Some(&state.cache.cache));

            // Ids assigned during the merge stay assigned even if the send fails.
            state.cache.template = batch.template.clone();
            self.storage.cache.persist(&state.cache).await?;
            (batch, merge)
        };

        batch.prune_empty_teams();
        if merge.appended == 0 {
            info!(
                "Nothing new to send ({} previously sent, {} duplicate)",
                merge.previously_sent, merge.duplicates
            );
            return Ok(SendOutcome::NothingNew);
        }

        let payload = batch.to_payload()?;
        let framed = self.framer.encode(&payload)?;
        info!(
            "Sending {} records for {} teams ({} bytes)",
            merge.appended,
            batch.teams.len(),
            framed.len()
        );

        let mut channel = self.opener.open().await?;
        let report = match self.transport.send(&framed, channel.as_mut()).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Send failed, nothing committed: {}", e);
                return Err(e.into());
            }
        };

        let mut state = self.state.lock().await;
        state.cache.cache.extend(merge.accepted.iter().copied());
        self.storage.cache.persist(&state.cache).await?;
        info!(
            "Sent {} records in {} chunks ({} retries)",
            merge.appended, report.chunks, report.retries
        );

        Ok(SendOutcome::Sent {
            records: merge.appended,
            report,
        })
    }

    /// Merge every device snapshot into the saved store on disk
    pub async fn save(&self) -> Result<SaveReport, SourceError> {
        let mut state = self.state.lock().await;
        let mut saved = self.storage.store.load().await?;
        saved.template.absorb(&state.cache.template);

        let sources: Vec<SourceDocument> = state.devices.values().cloned().collect();
        let merge = self.merger.apply(&mut saved, &sources, None);
        self.storage.store.persist(&saved).await?;

        let adopted = state.cache.template.absorb(&saved.template);
        self.storage.cache.persist(&state.cache).await?;
        debug!("Adopted {} template entries from the saved store", adopted);

        let location = self.storage.store.location();
        info!(
            "Saved {} new records to {} ({} total)",
            merge.appended,
            location,
            saved.record_count()
        );
        Ok(SaveReport {
            merge,
            total_records: saved.record_count(),
            location,
        })
    }

    /// Drop every device snapshot; returns how many were dropped
    pub async fn wipe(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.devices.len();
        state.devices.clear();
        info!("Wiped {} device snapshots", dropped);
        dropped
    }

    /// Forget every sent fingerprint; returns how many were forgotten
    pub async fn clear(&self) -> Result<usize, SourceError> {
        let mut state = self.state.lock().await;
        let forgotten = state.cache.cache.len();
        state.cache.cache.clear();
        self.storage.cache.persist(&state.cache).await?;
        info!("Cleared {} sent fingerprints", forgotten);
        Ok(forgotten)
    }
}
