//! Byte channel abstraction over the radio bridge.

use crate::LinkError;
use async_trait::async_trait;
use bytes::BytesMut;
use relay_wire::Sentinel;
use std::time::Duration;

/// A bidirectional byte stream with no message boundaries
#[async_trait]
pub trait ByteChannel: Send {
    /// Write every byte
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Read until the sentinel has been consumed or `timeout` elapses.
    ///
    /// Returns the bytes read, ending with the sentinel on success. On
    /// timeout the partial (possibly empty) buffer is returned, not an error.
    /// Bytes after the sentinel stay in the channel.
    async fn read_until(
        &mut self,
        sentinel: &Sentinel,
        timeout: Duration,
    ) -> Result<BytesMut, LinkError>;

    /// Bytes waiting to be read
    async fn bytes_available(&mut self) -> Result<usize, LinkError>;

    /// Port name, for logs
    fn name(&self) -> &str;
}
