//! Link error types.

use relay_wire::WireError;
use thiserror::Error;

/// Link errors
#[derive(Error, Debug)]
pub enum LinkError {
    /// No usable port; retried with backoff by callers
    #[error("link unavailable: {0}")]
    Unavailable(String),

    /// A chunk was never acknowledged
    #[error("no acknowledgment for chunk {chunk} after {attempts} attempts")]
    Timeout {
        /// Index of the unacknowledged chunk
        chunk: usize,
        /// Sends of that chunk, including the first
        attempts: u32,
    },

    /// I/O error on the channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// Framing error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The stop signal fired
    #[error("stopped")]
    Stopped,

    /// A blocking task panicked or was cancelled
    #[error("blocking task failed: {0}")]
    Task(String),
}
