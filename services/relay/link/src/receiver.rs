//! Receiver-side packet assembly.
//!
//! Reads the channel up to the sentinel, decodes the frame and hands the
//! payload to a [`PacketSink`]. Short buffers are line noise, bad frames and
//! sink failures are logged; none of them stop the loop. Only channel I/O
//! errors do, so the caller can reopen the port.

use crate::{ByteChannel, LinkError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use relay_wire::Framer;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Consumer of decoded payloads
#[async_trait]
pub trait PacketSink: Send {
    /// Handle one payload
    async fn deliver(&mut self, payload: Bytes) -> anyhow::Result<()>;
}

/// Result of one receive iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was waiting
    Idle,
    /// A buffer too short to be a packet was discarded
    Noise(usize),
    /// A buffer without a trailing sentinel was discarded
    Malformed(usize),
    /// A payload of this many bytes was delivered
    Delivered(usize),
    /// The sink refused the payload
    Rejected(String),
}

/// Turns channel bytes into delivered payloads
pub struct ReceiverAssembler<C> {
    channel: C,
    framer: Framer,
    read_timeout: Duration,
    poll_interval: Duration,
}

impl<C: ByteChannel> ReceiverAssembler<C> {
    /// Create an assembler
    pub fn new(channel: C, framer: Framer, read_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            channel,
            framer,
            read_timeout,
            poll_interval,
        }
    }

    /// Underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Run a single receive iteration
    pub async fn poll_once<S>(&mut self, sink: &mut S) -> Result<PollOutcome, LinkError>
    where
        S: PacketSink + ?Sized,
    {
        match self.next_buffer().await? {
            Some(buf) => Ok(self.handle(buf, sink).await),
            None => Ok(PollOutcome::Idle),
        }
    }

    /// Receive until the stop signal fires or the channel fails.
    ///
    /// The stop signal interrupts waiting and reading, never a delivery in
    /// progress.
    pub async fn run<S>(
        &mut self,
        sink: &mut S,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), LinkError>
    where
        S: PacketSink + ?Sized,
    {
        info!("Listening on {}", self.channel.name());
        loop {
            if *stop.borrow() {
                return Ok(());
            }

            let buf = tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return Ok(());
                    }
                    continue;
                }
                buf = self.next_buffer() => buf?,
            };

            if let Some(buf) = buf {
                self.handle(buf, sink).await;
            }
        }
    }

    /// Read one buffer, or sleep and return `None` when nothing is waiting
    async fn next_buffer(&mut self) -> Result<Option<BytesMut>, LinkError> {
        if self.channel.bytes_available().await? == 0 {
            tokio::time::sleep(self.poll_interval).await;
            return Ok(None);
        }
        let buf = self
            .channel
            .read_until(self.framer.sentinel(), self.read_timeout)
            .await?;
        Ok(Some(buf))
    }

    async fn handle<S>(&self, buf: BytesMut, sink: &mut S) -> PollOutcome
    where
        S: PacketSink + ?Sized,
    {
        let len = buf.len();
        if len <= self.framer.sentinel().len() {
            debug!("Ignoring {} bytes of noise", len);
            return PollOutcome::Noise(len);
        }

        let payload = match self.framer.decode(&buf) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Malformed packet ({} bytes): {}", len, e);
                return PollOutcome::Malformed(len);
            }
        };

        let payload_len = payload.len();
        match sink.deliver(payload).await {
            Ok(()) => {
                info!("Delivered {} byte packet", payload_len);
                PollOutcome::Delivered(payload_len)
            }
            Err(e) => {
                warn!("Packet rejected: {:#}", e);
                PollOutcome::Rejected(e.to_string())
            }
        }
    }
}
