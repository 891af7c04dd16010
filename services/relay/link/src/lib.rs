//! Radio link transport for the scout relay.
//!
//! The radio bridge is a serial device with a small buffer and no message
//! boundaries. This crate moves framed packets across it: the sender writes
//! one chunk at a time and waits for the bridge to echo the sentinel before
//! the next, the receiver reads up to the sentinel and hands each decoded
//! payload to a sink.
//!
//! ## Features
//!
//! - **Byte channels**: [`ByteChannel`] over a serial port or an in-memory mock
//! - **Port discovery**: wait for a port whose description matches a filter
//! - **Chunked send**: per-chunk acknowledgment with capped exponential backoff
//! - **Receiver assembly**: noise and malformed packets are logged and skipped
//!
//! ## Example
//!
//! ```rust
//! use relay_link::{ChunkedSender, MockChannel, RetryPolicy};
//! use relay_wire::{Chunker, Framer, Sentinel};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), relay_link::LinkError> {
//! let framer = Framer::new(Sentinel::bulk());
//! let framed = framer.encode(br#"{"teams":{}}"#)?;
//!
//! let mut channel = MockChannel::new("mock").with_auto_ack(Sentinel::bulk().as_bytes().to_vec());
//! let sender = ChunkedSender::new(
//!     Sentinel::bulk(),
//!     Chunker::new(),
//!     Duration::from_secs(15),
//!     RetryPolicy::default(),
//! );
//! let report = sender.send(&framed, &mut channel).await?;
//! assert_eq!(report.chunks, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod discovery;
pub mod error;
pub mod mock;
pub mod receiver;
pub mod retry;
pub mod sender;
pub mod serial;

// Re-export main types
pub use channel::ByteChannel;
pub use discovery::{PortDescription, PortSelector, AUTO_ADDRESS, DEFAULT_PORT_FILTER};
pub use error::LinkError;
pub use mock::{MockChannel, MockEvent};
pub use receiver::{PacketSink, PollOutcome, ReceiverAssembler};
pub use retry::{Backoff, RetryPolicy};
pub use sender::{ChunkedSender, SendReport, SendState};
pub use serial::{SerialChannel, DEFAULT_BAUD_RATE};
