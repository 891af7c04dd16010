//! Device source and station error types.

use relay_link::LinkError;
use relay_merge::MergeError;
use relay_storage::StorageError;
use relay_wire::WireError;
use std::time::Duration;
use thiserror::Error;

/// Source errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// The device bridge (ADB server, mount point) cannot be reached
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The device holds no export file
    #[error("export not found on {0}")]
    NotFound(String),

    /// A device command did not finish in time
    #[error("device command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transmission failed
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Persistence failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Payload could not be built
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Payload could not be framed
    #[error(transparent)]
    Wire(#[from] WireError),
}
