//! Persistence for the scout relay.
//!
//! This crate stores the aggregator's canonical store and replay cache, the
//! sender's transmission cache and offline save file, and renders the CSV
//! export. Backends are pluggable (in-memory, file-based); every file write
//! replaces the whole file atomically so a failed write leaves the previous
//! state intact.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod export;

use async_trait::async_trait;
use relay_merge::{CanonicalStore, LocalCache};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Export could not be written
    #[error("Export error: {0}")]
    Export(String),
}

/// Persisted canonical store
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Load the store; empty if nothing was persisted yet
    async fn load(&self) -> Result<CanonicalStore, StorageError>;

    /// Replace the persisted store
    async fn persist(&self, store: &CanonicalStore) -> Result<(), StorageError>;

    /// Where the store lives, for logs
    fn location(&self) -> String;
}

/// Persisted transmission cache and template
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Load the cache; empty if nothing was persisted yet
    async fn load(&self) -> Result<LocalCache, StorageError>;

    /// Replace the persisted cache
    async fn persist(&self, cache: &LocalCache) -> Result<(), StorageError>;

    /// Where the cache lives, for logs
    fn location(&self) -> String;
}

/// Which end of the link the storage serves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Collects from devices and transmits
    Sender,
    /// Receives and builds the canonical dataset
    Aggregator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Aggregator => f.write_str("aggregator"),
        }
    }
}

/// Storage backend configuration
#[derive(Clone, Debug, Default)]
pub enum StorageMode {
    /// In-memory storage (dry runs and tests)
    #[default]
    InMemory,
    /// JSON files in a data directory
    File {
        /// Data directory path
        data_dir: String,
    },
}

/// Sender offline save file
pub const SENDER_STORE_FILE: &str = "saved_scouts.json";
/// Sender transmission cache file
pub const SENDER_CACHE_FILE: &str = "scouting_cache.json";
/// Aggregator canonical store file
pub const AGGREGATOR_STORE_FILE: &str = "combined_scouts.json";
/// Aggregator replay cache file
pub const AGGREGATOR_CACHE_FILE: &str = "replay_cache.json";
/// Aggregator CSV export file
pub const EXPORT_FILE: &str = "combined_scouts.csv";

// Re-export backend implementations
pub use backend::file::{FileCache, FileStore};
pub use backend::mem::{MemoryCache, MemoryStore};
pub use export::{render_csv, write_csv, ExportReport, RowError};

/// Combined storage interface for one role
pub struct Storage {
    /// Canonical store (aggregator) or offline save file (sender)
    pub store: Box<dyn StoreBackend>,
    /// Replay cache (aggregator) or transmission cache (sender)
    pub cache: Box<dyn CacheBackend>,
    /// CSV export target; aggregator with file storage only
    pub export_path: Option<PathBuf>,
}

impl Storage {
    /// Create storage from configuration
    pub async fn from_mode(mode: StorageMode, role: Role) -> Result<Self, StorageError> {
        match mode {
            StorageMode::InMemory => Ok(Storage {
                store: Box::new(MemoryStore::new()),
                cache: Box::new(MemoryCache::new()),
                export_path: None,
            }),
            StorageMode::File { data_dir } => {
                let data_dir = PathBuf::from(data_dir);
                std::fs::create_dir_all(&data_dir)?;

                let (store_file, cache_file, export_path) = match role {
                    Role::Sender => (SENDER_STORE_FILE, SENDER_CACHE_FILE, None),
                    Role::Aggregator => (
                        AGGREGATOR_STORE_FILE,
                        AGGREGATOR_CACHE_FILE,
                        Some(data_dir.join(EXPORT_FILE)),
                    ),
                };

                Ok(Storage {
                    store: Box::new(FileStore::new(data_dir.join(store_file))),
                    cache: Box::new(FileCache::new(data_dir.join(cache_file))),
                    export_path,
                })
            }
        }
    }
}
