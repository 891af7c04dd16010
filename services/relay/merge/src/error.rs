//! Merge engine error types.

use thiserror::Error;

/// Merge errors
#[derive(Error, Debug)]
pub enum MergeError {
    /// A raw record lacks required structure
    #[error("record schema error: {0}")]
    RecordSchema(String),

    /// A whole source document could not be interpreted
    #[error("source unparsable: {0}")]
    SourceUnparsable(String),

    /// A received payload is not a valid transmission
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A persisted fingerprint is not a 32-byte hex digest
    #[error("invalid fingerprint: {0}")]
    Fingerprint(String),

    /// Serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
