//! Scout relay binary.
//!
//! `sender` runs at the pit: it polls collection tablets and transmits new
//! records over the radio bridge on operator command. `receiver` runs at
//! the stand: it reassembles packets, merges them into the canonical store
//! and keeps the CSV export current.

use anyhow::Result;
use clap::{Parser, Subcommand};
use relay_link::{
    ChunkedSender, LinkError, MockChannel, PortSelector, ReceiverAssembler, SerialChannel,
};
use relay_merge::{CanonicalIdPolicy, Merger};
use relay_source::{
    AdbDeviceSource, DeviceSource, DeviceWatcher, DirectoryDeviceSource, LinkOpener, MockOpener,
    SenderStation, SerialOpener, StationState,
};
use relay_storage::{Role, Storage, StorageMode};
use relay_wire::{Chunker, Framer, Sentinel};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{info, warn};

mod aggregator;
mod config;
mod logging;
mod prompt;

use aggregator::Aggregator;
use config::RelayConfig;

/// Grace period for background tasks after the stop signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Scouting data relay over a serial radio bridge
#[derive(Parser, Debug)]
#[command(name = "scout-relay", version, about = "Relay scouting records over a radio link")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "relay.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for the persisted store, cache and export
    #[arg(long)]
    data_dir: Option<String>,

    /// Serial port path, or 'auto'
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Packet terminator: bulk, probe, or hex bytes
    #[arg(long)]
    sentinel: Option<Sentinel>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Collect from tablets and transmit on command
    Sender {
        /// Read exports from subdirectories of this directory instead of adb
        #[arg(long)]
        device_dir: Option<PathBuf>,

        /// Transmit to an in-memory link and keep all state in memory
        #[arg(long)]
        dry_run: bool,

        /// Outbound chunk size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Wait for each chunk acknowledgment, e.g. 15s
        #[arg(long)]
        ack_timeout: Option<humantime::Duration>,

        /// Device poll interval, e.g. 1500ms
        #[arg(long)]
        poll_interval: Option<humantime::Duration>,

        /// Canonical id policy: name-digest, sequential, truncated-raw-id, raw-id
        #[arg(long)]
        id_policy: Option<CanonicalIdPolicy>,
    },
    /// Receive transmissions and maintain the canonical store
    Receiver {
        /// Ingest a saved store file, then exit
        #[arg(long)]
        import_file: Option<PathBuf>,

        /// Upper bound for one packet read, e.g. 35s
        #[arg(long)]
        read_timeout: Option<humantime::Duration>,
    },
}

fn millis(duration: humantime::Duration) -> u64 {
    Duration::from(duration).as_millis() as u64
}

impl Args {
    /// Command-line flags take precedence over file and environment
    fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(sentinel) = &self.sentinel {
            config.sentinel = sentinel.clone();
        }

        match &self.mode {
            Mode::Sender {
                chunk_size,
                ack_timeout,
                poll_interval,
                id_policy,
                ..
            } => {
                if let Some(size) = chunk_size {
                    config.sender.chunk_size = *size;
                }
                if let Some(timeout) = ack_timeout {
                    config.sender.ack_timeout_ms = millis(*timeout);
                }
                if let Some(interval) = poll_interval {
                    config.sender.poll_interval_ms = millis(*interval);
                }
                if let Some(policy) = id_policy {
                    config.sender.id_policy = *policy;
                }
            }
            Mode::Receiver { read_timeout, .. } => {
                if let Some(timeout) = read_timeout {
                    config.receiver.read_timeout_ms = millis(*timeout);
                }
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let role = match args.mode {
        Mode::Sender { .. } => Role::Sender,
        Mode::Receiver { .. } => Role::Aggregator,
    };

    logging::init(&role.to_string(), &args.log_level)?;
    info!("Starting scout-relay {} v{}", role, env!("CARGO_PKG_VERSION"));

    let mut config = RelayConfig::load_from_file(&args.config)?;
    args.apply_overrides(&mut config);

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    {
        let stop_tx = stop_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, shutting down");
                let _ = stop_tx.send(true);
            }
        });
    }

    let result = match args.mode {
        Mode::Sender {
            device_dir,
            dry_run,
            ..
        } => run_sender(&config, device_dir, dry_run, &stop_tx, stop_rx).await,
        Mode::Receiver { import_file, .. } => match import_file {
            Some(path) => import(&config, path).await,
            None => run_receiver(&config, stop_rx).await,
        },
    };

    if let Err(e) = &result {
        crate::component_error!("main", "{:#}", e);
    }
    info!("scout-relay {} stopped", role);
    result
}

async fn run_sender(
    config: &RelayConfig,
    device_dir: Option<PathBuf>,
    dry_run: bool,
    stop_tx: &watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mode = if dry_run {
        StorageMode::InMemory
    } else {
        StorageMode::File {
            data_dir: config.data_dir.clone(),
        }
    };
    let storage = Storage::from_mode(mode, Role::Sender).await?;
    let cache = storage.cache.load().await?;
    crate::component_info!(
        "station",
        "Loaded cache from {}: {} sent records, {} metrics",
        storage.cache.location(),
        cache.cache.len(),
        cache.template.len()
    );
    let state = StationState::shared(cache);

    let source: Arc<dyn DeviceSource> = match device_dir {
        Some(dir) => Arc::new(DirectoryDeviceSource::for_export_path(
            dir,
            &config.sender.adb.export_path,
        )),
        None => Arc::new(AdbDeviceSource::new(config.sender.adb.to_adb_config())),
    };
    let watcher = DeviceWatcher::new(source, state.clone(), config.sender.poll_interval());
    let mut watcher_handle = tokio::spawn(watcher.run(stop_rx.clone()));

    let opener: Box<dyn LinkOpener> = if dry_run {
        crate::component_warn!("station", "Dry run: transmissions go to an in-memory link");
        let channel =
            MockChannel::new("dry-run").with_auto_ack(config.sentinel.as_bytes().to_vec());
        Box::new(MockOpener::new(channel))
    } else {
        Box::new(SerialOpener::new(config.port_selector(), config.baud_rate))
    };

    let transport = ChunkedSender::new(
        config.sentinel.clone(),
        Chunker::with_chunk_size(config.sender.chunk_size)?,
        config.sender.ack_timeout(),
        config.sender.retry_policy(),
    );
    let station = SenderStation::new(
        state,
        Merger::with_policy(config.sender.id_policy),
        Framer::new(config.sentinel.clone()),
        transport,
        opener,
        storage,
    );

    let result = prompt::run(BufReader::new(tokio::io::stdin()), &station, stop_rx).await;

    let _ = stop_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut watcher_handle)
        .await
        .is_err()
    {
        warn!("Device watcher did not stop within {:?}, aborting", SHUTDOWN_GRACE);
        watcher_handle.abort();
    }
    result
}

async fn import(config: &RelayConfig, path: PathBuf) -> Result<()> {
    let storage = Storage::from_mode(
        StorageMode::File {
            data_dir: config.data_dir.clone(),
        },
        Role::Aggregator,
    )
    .await?;
    let mut aggregator = Aggregator::load(storage).await?;
    let report = aggregator.import_file(&path).await?;
    info!(
        "Imported {}: {} new records, {} duplicate",
        path.display(),
        report.appended,
        report.duplicates
    );
    Ok(())
}

async fn run_receiver(config: &RelayConfig, mut stop: watch::Receiver<bool>) -> Result<()> {
    let storage = Storage::from_mode(
        StorageMode::File {
            data_dir: config.data_dir.clone(),
        },
        Role::Aggregator,
    )
    .await?;
    let mut aggregator = Aggregator::load(storage).await?;
    let framer = Framer::new(config.sentinel.clone());
    let selector = config.port_selector();
    let reopen = config.receiver.reopen_backoff();
    let mut failures = 0;

    loop {
        if *stop.borrow() {
            break;
        }

        let path = match port_path(&selector, config, &mut stop).await {
            Ok(path) => path,
            Err(LinkError::Stopped) => break,
            Err(e) => {
                failures += 1;
                crate::component_warn!("link", "Port discovery failed: {}", e);
                if pause(reopen.delay(failures), &mut stop).await {
                    break;
                }
                continue;
            }
        };

        let channel =
            match SerialChannel::open_with_retry(&path, config.baud_rate, reopen, &mut stop).await {
                Ok(channel) => channel,
                Err(LinkError::Stopped) => break,
                Err(e) => {
                    failures += 1;
                    crate::component_warn!("link", "Cannot open {}: {}", path, e);
                    if pause(reopen.delay(failures), &mut stop).await {
                        break;
                    }
                    continue;
                }
            };
        failures = 0;

        let mut assembler = ReceiverAssembler::new(
            channel,
            framer.clone(),
            config.receiver.read_timeout(),
            config.receiver.poll_interval(),
        );
        match assembler.run(&mut aggregator, stop.clone()).await {
            Ok(()) => break,
            Err(e) => {
                crate::component_warn!("link", "Link on {} failed: {}; reopening", path, e);
            }
        }
    }
    Ok(())
}

async fn port_path(
    selector: &PortSelector,
    config: &RelayConfig,
    stop: &mut watch::Receiver<bool>,
) -> Result<String, LinkError> {
    if selector.is_auto() {
        selector
            .wait_for_port(config.receiver.discovery_interval(), stop)
            .await
    } else {
        Ok(selector.address.clone())
    }
}

/// Sleep for `delay`; true if the stop signal fired first
async fn pause(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *stop.borrow(),
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "scout-relay",
            "--port",
            "/dev/ttyUSB0",
            "--sentinel",
            "probe",
            "sender",
            "--chunk-size",
            "32",
            "--ack-timeout",
            "2s",
            "--id-policy",
            "sequential",
        ]);
        let mut config = RelayConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.sentinel, Sentinel::probe());
        assert_eq!(config.sender.chunk_size, 32);
        assert_eq!(config.sender.ack_timeout_ms, 2_000);
        assert_eq!(config.sender.id_policy, CanonicalIdPolicy::Sequential);
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_receiver_flags() {
        let args = Args::parse_from([
            "scout-relay",
            "receiver",
            "--import-file",
            "saved_scouts.json",
            "--read-timeout",
            "10s",
        ]);
        let mut config = RelayConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.receiver.read_timeout_ms, 10_000);
        assert!(matches!(
            args.mode,
            Mode::Receiver {
                import_file: Some(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_pause_wakes_on_stop() {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();
        assert!(pause(Duration::from_secs(3600), &mut stop_rx).await);
    }
}
