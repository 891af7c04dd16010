//! Collection device access and the sender station.
//!
//! Tablets write their scouting export to a fixed path. A [`DeviceSource`]
//! lists attached devices and reads that export; the [`DeviceWatcher`] keeps
//! the latest snapshot of every device in shared state; the
//! [`SenderStation`] turns those snapshots into transmissions, offline saves
//! and cache maintenance.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod station;
pub mod watcher;

// Re-export main types
pub use device::{
    AdbConfig, AdbDeviceSource, DeviceHandle, DeviceSource, DirectoryDeviceSource,
    DEFAULT_EXPORT_PATH,
};
pub use error::SourceError;
pub use station::{
    LinkOpener, MockOpener, SaveReport, SendOutcome, SenderStation, SerialOpener,
};
pub use watcher::{DeviceWatcher, SharedState, StationState, WatchSummary};
