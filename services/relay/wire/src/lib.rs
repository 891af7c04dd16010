//! Packet framing and chunking for the scout relay radio link.
//!
//! The link is a serial byte stream with no message boundaries, bridged over
//! a half-duplex LoRa radio with small buffers. A packet is made
//! self-delimiting by a trailing sentinel, and the sender splits the framed
//! packet into small chunks that are acknowledged one at a time.
//!
//! ## Wire Format
//!
//! ```text
//! +-----------------------------+------------------------------+
//! | payload (compact JSON text) | trailing NUL bytes stripped  |
//! +-----------------------------+------------------------------+
//! | sentinel (4 or 6 bytes)     | e.g. FF 32 84 FF             |
//! +-----------------------------+------------------------------+
//! ```
//!
//! Outbound, the framed packet is cut into chunks of `chunk_size` bytes
//! (default 128); the far end answers each chunk with the sentinel alone.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod error;
pub mod frame;

// Re-export main types
pub use chunk::{Chunker, DEFAULT_CHUNK_SIZE};
pub use error::WireError;
pub use frame::{Framer, Sentinel, BULK_SENTINEL, PROBE_SENTINEL};
