//! Chunking of framed packets for the radio link.
//!
//! The radio bridge buffers only a small amount of data, so a framed packet
//! is written in fixed-size chunks, each acknowledged before the next.

use crate::WireError;
use bytes::Bytes;

/// Default chunk size accepted by the radio bridge
pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// Splits framed packets into bounded chunks
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a new chunker with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create a chunker with an explicit chunk size
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self, WireError> {
        if chunk_size == 0 {
            return Err(WireError::ZeroChunkSize);
        }
        Ok(Self { chunk_size })
    }

    /// Configured chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks needed for `len` bytes
    pub fn chunk_count(&self, len: usize) -> usize {
        (len + self.chunk_size - 1) / self.chunk_size
    }

    /// Split a framed packet into chunks; the last may be shorter
    pub fn split(&self, framed: &Bytes) -> Vec<Bytes> {
        let total_chunks = self.chunk_count(framed.len());
        let mut chunks = Vec::with_capacity(total_chunks);
        let mut offset = 0;

        for _ in 0..total_chunks {
            let chunk_end = std::cmp::min(offset + self.chunk_size, framed.len());
            chunks.push(framed.slice(offset..chunk_end));
            offset = chunk_end;
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}
