//! Configuration handling for the relay.
//!
//! Settings come from a YAML file with a `sender:` and a `receiver:`
//! section, then environment variables, then command-line flags (applied in
//! `main`). A missing or unparsable file falls back to defaults.

use anyhow::Result;
use relay_link::{Backoff, PortSelector, RetryPolicy, AUTO_ADDRESS, DEFAULT_BAUD_RATE, DEFAULT_PORT_FILTER};
use relay_merge::CanonicalIdPolicy;
use relay_source::{AdbConfig, DEFAULT_EXPORT_PATH};
use relay_wire::{Sentinel, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Directory holding the persisted store, cache and export
    pub data_dir: String,
    /// Serial port path, or `auto`
    pub port: String,
    /// Substring a port description must contain under `auto`
    pub port_filter: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Packet terminator: `bulk`, `probe` or hex
    pub sentinel: Sentinel,
    /// Sender settings
    pub sender: SenderConfig,
    /// Receiver settings
    pub receiver: ReceiverConfig,
}

/// Sender settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Outbound chunk size in bytes
    pub chunk_size: usize,
    /// Wait for each chunk acknowledgment (milliseconds)
    pub ack_timeout_ms: u64,
    /// Resends of an unacknowledged chunk before giving up
    pub max_retries: u32,
    /// First resend delay (milliseconds)
    pub backoff_base_ms: u64,
    /// Resend delay cap (milliseconds)
    pub backoff_max_ms: u64,
    /// Device poll interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Canonical id policy for new metric names
    pub id_policy: CanonicalIdPolicy,
    /// ADB server and device export settings
    pub adb: AdbSettings,
}

/// ADB settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbSettings {
    /// `adb` executable, looked up on PATH unless absolute
    pub binary: String,
    /// ADB server host
    pub host: String,
    /// ADB server port
    pub port: u16,
    /// Export file location on each tablet
    pub export_path: String,
    /// Upper bound for one adb invocation (milliseconds)
    pub command_timeout_ms: u64,
}

/// Receiver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Upper bound for one packet read (milliseconds)
    pub read_timeout_ms: u64,
    /// Pause between reads when the line is quiet (milliseconds)
    pub poll_interval_ms: u64,
    /// Port discovery poll interval (milliseconds)
    pub discovery_interval_ms: u64,
    /// First reopen delay after a link failure (milliseconds)
    pub reopen_backoff_base_ms: u64,
    /// Reopen delay cap (milliseconds)
    pub reopen_backoff_max_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            data_dir: ".".to_string(),
            port: AUTO_ADDRESS.to_string(),
            port_filter: DEFAULT_PORT_FILTER.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            sentinel: Sentinel::bulk(),
            sender: SenderConfig::default(),
            receiver: ReceiverConfig::default(),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_timeout_ms: 15_000,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            poll_interval_ms: 1_500,
            id_policy: CanonicalIdPolicy::NameDigest,
            adb: AdbSettings::default(),
        }
    }
}

impl Default for AdbSettings {
    fn default() -> Self {
        let adb = AdbConfig::default();
        Self {
            binary: adb.binary,
            host: adb.host,
            port: adb.port,
            export_path: DEFAULT_EXPORT_PATH.to_string(),
            command_timeout_ms: adb.command_timeout.as_millis() as u64,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 35_000,
            poll_interval_ms: 1_250,
            discovery_interval_ms: 2_000,
            reopen_backoff_base_ms: 500,
            reopen_backoff_max_ms: 8_000,
        }
    }
}

impl RelayConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<RelayConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides(|key| std::env::var(key).ok());

        info!(
            "Relay configuration: data_dir={}, port={}, baud={}, chunk_size={}, sentinel={}",
            config.data_dir, config.port, config.baud_rate, config.sender.chunk_size, config.sentinel
        );
        Ok(config)
    }

    /// Apply `RELAY_*` overrides; unparsable values are ignored with a warning
    fn apply_environment_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(data_dir) = var("RELAY_DATA_DIR") {
            info!("Data directory overridden by environment: {}", data_dir);
            self.data_dir = data_dir;
        }

        if let Some(port) = var("RELAY_PORT") {
            info!("Serial port overridden by environment: {}", port);
            self.port = port;
        }

        if let Some(baud) = var("RELAY_BAUD") {
            match baud.parse::<u32>() {
                Ok(baud) => {
                    self.baud_rate = baud;
                    info!("Baud rate overridden by environment: {}", baud);
                }
                Err(e) => warn!("Ignoring RELAY_BAUD={}: {}", baud, e),
            }
        }

        if let Some(chunk_size) = var("RELAY_CHUNK_SIZE") {
            match chunk_size.parse::<usize>() {
                Ok(size) => {
                    self.sender.chunk_size = size;
                    info!("Chunk size overridden by environment: {}", size);
                }
                Err(e) => warn!("Ignoring RELAY_CHUNK_SIZE={}: {}", chunk_size, e),
            }
        }

        if let Some(sentinel) = var("RELAY_SENTINEL") {
            match sentinel.parse::<Sentinel>() {
                Ok(parsed) => {
                    info!("Sentinel overridden by environment: {}", parsed);
                    self.sentinel = parsed;
                }
                Err(e) => warn!("Ignoring RELAY_SENTINEL={}: {}", sentinel, e),
            }
        }
    }

    /// Serial port selection
    pub fn port_selector(&self) -> PortSelector {
        PortSelector::new(self.port.clone(), self.port_filter.clone())
    }
}

impl SenderConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Backoff::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
        }
    }
}

impl AdbSettings {
    pub fn to_adb_config(&self) -> AdbConfig {
        AdbConfig {
            binary: self.binary.clone(),
            host: self.host.clone(),
            port: self.port,
            export_path: self.export_path.clone(),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }
}

impl ReceiverConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn reopen_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reopen_backoff_base_ms),
            Duration::from_millis(self.reopen_backoff_max_ms),
        )
    }
}
