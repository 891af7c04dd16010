//! Chunked send/acknowledge loop.
//!
//! The bridge can only buffer one chunk, so chunks go out strictly in order
//! and each waits for the bridge to echo the sentinel. An unacknowledged
//! chunk is resent after a backoff until the retry budget runs out.

use crate::{ByteChannel, LinkError, RetryPolicy};
use bytes::Bytes;
use relay_wire::{Chunker, Sentinel};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read window used to discard bytes left over from an earlier attempt
const STALE_READ: Duration = Duration::from_millis(50);

/// Position of the send loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Nothing (left) to send
    Idle,
    /// Writing chunk `i`
    Sending(usize),
    /// Waiting for the acknowledgment of chunk `i`
    AwaitAck(usize),
    /// Backing off before resending chunk `i`
    Retry(usize),
}

/// Outcome of a completed transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Chunks delivered
    pub chunks: usize,
    /// Framed bytes delivered
    pub bytes: usize,
    /// Resends across all chunks
    pub retries: u32,
}

/// Drives a framed packet across a byte channel
#[derive(Debug, Clone)]
pub struct ChunkedSender {
    sentinel: Sentinel,
    chunker: Chunker,
    ack_timeout: Duration,
    retry: RetryPolicy,
}

impl ChunkedSender {
    /// Create a sender
    pub fn new(
        sentinel: Sentinel,
        chunker: Chunker,
        ack_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sentinel,
            chunker,
            ack_timeout,
            retry,
        }
    }

    /// Send `framed` chunk by chunk, waiting for an acknowledgment after each.
    ///
    /// Fails with [`LinkError::Timeout`] once a chunk has gone unacknowledged
    /// `max_retries + 1` times.
    pub async fn send<C>(&self, framed: &[u8], channel: &mut C) -> Result<SendReport, LinkError>
    where
        C: ByteChannel + ?Sized,
    {
        let framed = Bytes::copy_from_slice(framed);
        let chunks = self.chunker.split(&framed);
        let mut report = SendReport {
            chunks: 0,
            bytes: 0,
            retries: 0,
        };
        let mut retries_for_chunk = 0u32;

        let mut state = if chunks.is_empty() {
            SendState::Idle
        } else {
            SendState::Sending(0)
        };

        info!(
            "Sending {} bytes in {} chunks over {}",
            framed.len(),
            chunks.len(),
            channel.name()
        );

        loop {
            state = match state {
                SendState::Idle => break,
                SendState::Sending(i) => {
                    channel.write_all(&chunks[i]).await?;
                    debug!("Wrote chunk {}/{} ({} bytes)", i + 1, chunks.len(), chunks[i].len());
                    SendState::AwaitAck(i)
                }
                SendState::AwaitAck(i) => {
                    let reply = channel.read_until(&self.sentinel, self.ack_timeout).await?;
                    if reply.ends_with(self.sentinel.as_bytes()) {
                        debug!("Chunk {} acknowledged", i + 1);
                        report.chunks += 1;
                        report.bytes += chunks[i].len();
                        retries_for_chunk = 0;
                        if i + 1 < chunks.len() {
                            SendState::Sending(i + 1)
                        } else {
                            SendState::Idle
                        }
                    } else {
                        warn!(
                            "No acknowledgment for chunk {} within {:?} ({} stray bytes)",
                            i + 1,
                            self.ack_timeout,
                            reply.len()
                        );
                        SendState::Retry(i)
                    }
                }
                SendState::Retry(i) => {
                    if retries_for_chunk >= self.retry.max_retries {
                        return Err(LinkError::Timeout {
                            chunk: i,
                            attempts: retries_for_chunk + 1,
                        });
                    }
                    retries_for_chunk += 1;
                    report.retries += 1;
                    let delay = self.retry.backoff.delay(retries_for_chunk);
                    debug!(
                        "Resending chunk {} in {:?} (retry {}/{})",
                        i + 1,
                        delay,
                        retries_for_chunk,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    // A late ack for the previous attempt must not count for the resend.
                    let stale = self.discard_stale(channel).await?;
                    if stale > 0 {
                        debug!("Discarded {} late bytes before resending chunk {}", stale, i + 1);
                    }
                    SendState::Sending(i)
                }
            };
        }

        info!(
            "Transmission complete: {} chunks, {} retries",
            report.chunks, report.retries
        );
        Ok(report)
    }

    async fn discard_stale<C>(&self, channel: &mut C) -> Result<usize, LinkError>
    where
        C: ByteChannel + ?Sized,
    {
        let mut discarded = 0;
        while channel.bytes_available().await? > 0 {
            let stale = channel.read_until(&self.sentinel, STALE_READ).await?;
            if stale.is_empty() {
                break;
            }
            discarded += stale.len();
        }
        Ok(discarded)
    }
}
