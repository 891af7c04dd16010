//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer is not longer than the sentinel itself
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    /// Buffer does not end with the sentinel
    #[error("malformed frame: missing trailing sentinel")]
    MalformedFrame,

    /// Payload would make the sentinel appear before the end of the frame
    #[error("sentinel occurs inside payload at offset {0}")]
    EmbeddedSentinel(usize),

    /// Sentinel with no bytes
    #[error("sentinel must not be empty")]
    EmptySentinel,

    /// Chunk size of zero
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,

    /// Unparsable sentinel specification
    #[error("invalid sentinel spec: {0}")]
    SentinelSpec(String),
}
