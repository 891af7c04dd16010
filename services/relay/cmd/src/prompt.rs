//! Operator command prompt for the sender.

use anyhow::Result;
use relay_link::LinkError;
use relay_source::{SendOutcome, SenderStation, SourceError};
use std::io::Write;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;

const HELP: &str = "Commands: send | save | wipe | clear | exit";

/// One operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Transmit every record not sent before
    Send,
    /// Merge collected records into the saved store on disk
    Save,
    /// Drop collected device snapshots
    Wipe,
    /// Forget which records were sent
    Clear,
    Help,
    Exit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "send" => Ok(Command::Send),
            "save" => Ok(Command::Save),
            "wipe" => Ok(Command::Wipe),
            "clear" => Ok(Command::Clear),
            "help" | "?" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            other => Err(format!("Unknown command '{}'. {}", other, HELP)),
        }
    }
}

/// Read commands from `input` until `exit`, end of input, or the stop signal
pub async fn run<R>(input: R, station: &SenderStation, mut stop: watch::Receiver<bool>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    println!("{}", HELP);

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(Command::Exit) => break,
            Ok(command) => println!("{}", execute(command, station).await),
            Err(message) => println!("{}", message),
        }
    }
    Ok(())
}

/// Run one command; returns the line shown to the operator
pub async fn execute(command: Command, station: &SenderStation) -> String {
    match command {
        Command::Send => match station.send().await {
            Ok(SendOutcome::NothingNew) => "Nothing new to send".to_string(),
            Ok(SendOutcome::Sent { records, report }) => format!(
                "Sent {} records ({} bytes, {} chunks, {} retries)",
                records, report.bytes, report.chunks, report.retries
            ),
            Err(SourceError::Link(LinkError::Timeout { chunk, attempts })) => {
                crate::component_error!(
                    "prompt",
                    "Chunk {} unacknowledged after {} attempts",
                    chunk + 1,
                    attempts
                );
                format!(
                    "Send failed: no acknowledgment for chunk {} after {} attempts; nothing was marked as sent",
                    chunk + 1,
                    attempts
                )
            }
            Err(e) => {
                crate::component_error!("prompt", "Send failed: {}", e);
                format!("Send failed: {}", e)
            }
        },
        Command::Save => match station.save().await {
            Ok(report) => format!(
                "Saved {} new records to {} ({} total, {} rejected)",
                report.merge.appended,
                report.location,
                report.total_records,
                report.merge.rejected.len()
            ),
            Err(e) => {
                crate::component_error!("prompt", "Save failed: {}", e);
                format!("Save failed: {}", e)
            }
        },
        Command::Wipe => format!("Wiped data from {} devices", station.wipe().await),
        Command::Clear => match station.clear().await {
            Ok(forgotten) => format!("Cleared {} sent records from the cache", forgotten),
            Err(e) => {
                crate::component_error!("prompt", "Clear failed: {}", e);
                format!("Clear failed: {}", e)
            }
        },
        Command::Help => HELP.to_string(),
        Command::Exit => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_link::{ChunkedSender, MockChannel, RetryPolicy};
    use relay_merge::{LocalCache, Merger, SourceDocument};
    use relay_source::{MockOpener, StationState};
    use relay_storage::{MemoryCache, MemoryStore, Storage};
    use relay_wire::{Chunker, Framer, Sentinel};
    use std::time::Duration;

    fn station(channel: MockChannel) -> SenderStation {
        SenderStation::new(
            StationState::shared(LocalCache::default()),
            Merger::default(),
            Framer::new(Sentinel::bulk()),
            ChunkedSender::new(
                Sentinel::bulk(),
                Chunker::new(),
                Duration::from_millis(100),
                RetryPolicy::default(),
            ),
            Box::new(MockOpener::new(channel)),
            Storage {
                store: Box::new(MemoryStore::new()),
                cache: Box::new(MemoryCache::new()),
                export_path: None,
            },
        )
    }

    async fn collect(station: &SenderStation) {
        let document = SourceDocument::parse(
            "tablet-1",
            r#"{"teams":{"254":[{"metrics":{"a1":{"name":"Auto Points","value":12}}}]}}"#,
        )
        .unwrap();
        station
            .state()
            .lock()
            .await
            .devices
            .insert("tablet-1".to_string(), document);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("send".parse::<Command>(), Ok(Command::Send));
        assert_eq!("  SAVE \n".parse::<Command>(), Ok(Command::Save));
        assert_eq!("quit".parse::<Command>(), Ok(Command::Exit));
        assert_eq!("?".parse::<Command>(), Ok(Command::Help));
        assert!("transmit".parse::<Command>().is_err());
    }

    #[tokio::test]
    async fn test_execute_send_then_nothing_new() {
        let channel = MockChannel::new("mock").with_auto_ack(Sentinel::bulk().as_bytes().to_vec());
        let station = station(channel);
        collect(&station).await;

        let sent = execute(Command::Send, &station).await;
        assert!(sent.starts_with("Sent 1 records"), "{}", sent);

        collect(&station).await;
        assert_eq!(execute(Command::Send, &station).await, "Nothing new to send");
        assert_eq!(
            execute(Command::Clear, &station).await,
            "Cleared 1 sent records from the cache"
        );
    }

    #[tokio::test]
    async fn test_run_stops_at_exit() {
        let channel = MockChannel::new("mock").with_auto_ack(Sentinel::bulk().as_bytes().to_vec());
        let station = station(channel.clone());
        collect(&station).await;
        let (_stop_tx, stop_rx) = watch::channel(false);

        let input: &[u8] = b"wipe\n\nbogus\nexit\nsend\n";
        run(input, &station, stop_rx).await.unwrap();

        assert!(station.state().lock().await.devices.is_empty());
        assert!(channel.writes().is_empty());
    }

    #[tokio::test]
    async fn test_run_ends_at_eof() {
        let station = station(MockChannel::new("mock"));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let input: &[u8] = b"help\n";
        run(input, &station, stop_rx).await.unwrap();
    }
}
