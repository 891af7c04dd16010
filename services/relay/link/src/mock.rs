//! In-memory byte channel for tests and dry runs.
//!
//! Inbound bytes are queued by the test (or generated as acknowledgments
//! after each write). Every write and completed read is recorded so tests
//! can check the exact interleaving.

use crate::{ByteChannel, LinkError};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use relay_wire::Sentinel;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One recorded channel operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Bytes written by the code under test
    Write(Bytes),
    /// Bytes returned by a `read_until`
    Read(Bytes),
}

#[derive(Default)]
struct MockState {
    inbound: VecDeque<u8>,
    events: Vec<MockEvent>,
    auto_ack: Option<Bytes>,
    drop_acks: usize,
}

/// Scriptable in-memory channel; clones share state
#[derive(Clone)]
pub struct MockChannel {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    /// Create an empty channel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Queue `ack` as inbound bytes after every write
    pub fn with_auto_ack(self, ack: impl Into<Bytes>) -> Self {
        self.state().auto_ack = Some(ack.into());
        self
    }

    /// Suppress the next `n` automatic acknowledgments
    pub fn drop_next_acks(&self, n: usize) {
        self.state().drop_acks = n;
    }

    /// Queue inbound bytes
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes.iter().copied());
    }

    /// Every recorded operation, in order
    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    /// Every write, in order
    pub fn writes(&self) -> Vec<Bytes> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Write(bytes) => Some(bytes.clone()),
                MockEvent::Read(_) => None,
            })
            .collect()
    }

    /// All written bytes concatenated
    pub fn written_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        for write in self.writes() {
            out.extend_from_slice(&write);
        }
        out.freeze()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move inbound bytes into `buf`; true once it ends with the sentinel
    fn drain_into(&self, buf: &mut BytesMut, sentinel: &Sentinel) -> bool {
        let mut state = self.state();
        while let Some(byte) = state.inbound.pop_front() {
            buf.put_u8(byte);
            if buf.ends_with(sentinel.as_bytes()) {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl ByteChannel for MockChannel {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state();
        state.events.push(MockEvent::Write(Bytes::copy_from_slice(bytes)));
        if let Some(ack) = state.auto_ack.clone() {
            if state.drop_acks > 0 {
                state.drop_acks -= 1;
            } else {
                state.inbound.extend(ack.iter().copied());
            }
        }
        Ok(())
    }

    async fn read_until(
        &mut self,
        sentinel: &Sentinel,
        timeout: Duration,
    ) -> Result<BytesMut, LinkError> {
        let deadline = Instant::now() + timeout;
        let mut buf = BytesMut::new();

        loop {
            if self.drain_into(&mut buf, sentinel) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }

        self.state()
            .events
            .push(MockEvent::Read(Bytes::copy_from_slice(&buf)));
        Ok(buf)
    }

    async fn bytes_available(&mut self) -> Result<usize, LinkError> {
        Ok(self.state().inbound.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_read_stops_at_sentinel() {
        let mut channel = MockChannel::new("mock");
        let sentinel = Sentinel::bulk();
        let mut inbound = b"abc".to_vec();
        inbound.extend_from_slice(sentinel.as_bytes());
        inbound.extend_from_slice(b"rest");
        channel.push_inbound(&inbound);

        let buf = channel
            .read_until(&sentinel, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(buf.len(), 3 + sentinel.len());
        assert_eq!(channel.bytes_available().await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out_with_partial_buffer() {
        let mut channel = MockChannel::new("mock");
        channel.push_inbound(b"partial");

        let start = Instant::now();
        let buf = channel
            .read_until(&Sentinel::bulk(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(buf.as_ref(), b"partial");
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_auto_ack_and_drops() {
        let ack = Sentinel::bulk();
        let mut channel = MockChannel::new("mock").with_auto_ack(ack.as_bytes().to_vec());
        channel.drop_next_acks(1);

        channel.write_all(b"one").await.unwrap();
        assert_eq!(channel.bytes_available().await.unwrap(), 0);
        channel.write_all(b"two").await.unwrap();
        assert_eq!(channel.bytes_available().await.unwrap(), ack.len());
        assert_eq!(channel.written_bytes().as_ref(), b"onetwo");
    }
}
