//! Serial port channel to the radio bridge.
//!
//! `serialport` is blocking, so every port operation runs on the blocking
//! pool. Reads use a short port timeout and loop until the sentinel or the
//! caller's deadline.

use crate::{Backoff, ByteChannel, LinkError};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use relay_wire::Sentinel;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// Baud rate of the radio bridge firmware
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Port read timeout; bounds how late a deadline is noticed
const READ_SLICE: Duration = Duration::from_millis(100);

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Serial port byte channel
pub struct SerialChannel {
    name: String,
    port: SharedPort,
}

impl SerialChannel {
    /// Open a serial port, 8N1 without flow control
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_SLICE)
            .open()?;

        info!("Opened serial port: {} at {} baud", path, baud_rate);
        Ok(Self {
            name: path.to_string(),
            port: Arc::new(Mutex::new(port)),
        })
    }

    /// Open a port, backing off while it is busy or held by another process.
    ///
    /// A port that no longer exists is reported as
    /// [`LinkError::Unavailable`] so the caller can rediscover.
    pub async fn open_with_retry(
        path: &str,
        baud_rate: u32,
        backoff: Backoff,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Self, LinkError> {
        let mut attempt = 0;
        loop {
            if *stop.borrow() {
                return Err(LinkError::Stopped);
            }

            let owned_path = path.to_string();
            let opened = tokio::task::spawn_blocking(move || Self::open(&owned_path, baud_rate))
                .await
                .map_err(|e| LinkError::Task(e.to_string()))?;

            match opened {
                Ok(channel) => return Ok(channel),
                Err(LinkError::Serial(e)) if e.kind() == serialport::ErrorKind::NoDevice => {
                    return Err(LinkError::Unavailable(format!("{}: {}", path, e)));
                }
                Err(e) => {
                    attempt += 1;
                    let delay = backoff.delay(attempt);
                    warn!(
                        "Could not open {} ({}), retrying in {:?} (attempt {})",
                        path, e, delay, attempt
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                return Err(LinkError::Stopped);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn with_port<T, F>(&self, op: F) -> Result<T, LinkError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn SerialPort>) -> Result<T, LinkError> + Send + 'static,
    {
        let port = self.port.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = port
                .lock()
                .map_err(|_| LinkError::Task("serial port lock poisoned".to_string()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| LinkError::Task(e.to_string()))?
    }
}

fn read_until_blocking(
    port: &mut Box<dyn SerialPort>,
    sentinel: &Sentinel,
    timeout: Duration,
) -> Result<BytesMut, LinkError> {
    let deadline = Instant::now() + timeout;
    let mut buf = BytesMut::new();
    let mut byte = [0u8; 1];

    // Byte at a time so nothing past the sentinel is consumed.
    while Instant::now() < deadline {
        match port.read(&mut byte) {
            Ok(1) => {
                buf.put_u8(byte[0]);
                if buf.ends_with(sentinel.as_bytes()) {
                    break;
                }
            }
            // Some drivers return an empty read instead of timing out.
            Ok(_) => std::thread::sleep(idle_wait(deadline)),
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf)
}

/// Pause after an empty read, never past `deadline`
fn idle_wait(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .min(READ_SLICE)
}

#[async_trait]
impl ByteChannel for SerialChannel {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let bytes = bytes.to_vec();
        self.with_port(move |port| {
            port.write_all(&bytes)?;
            port.flush()?;
            Ok(())
        })
        .await
    }

    async fn read_until(
        &mut self,
        sentinel: &Sentinel,
        timeout: Duration,
    ) -> Result<BytesMut, LinkError> {
        let sentinel = sentinel.clone();
        self.with_port(move |port| read_until_blocking(port, &sentinel, timeout))
            .await
    }

    async fn bytes_available(&mut self) -> Result<usize, LinkError> {
        self.with_port(|port| Ok(port.bytes_to_read()? as usize))
            .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_wait_is_bounded() {
        let far = Instant::now() + Duration::from_secs(30);
        assert_eq!(idle_wait(far), READ_SLICE);

        let past = Instant::now() - Duration::from_millis(1);
        assert_eq!(idle_wait(past), Duration::ZERO);

        let near = Instant::now() + Duration::from_millis(20);
        assert!(idle_wait(near) <= Duration::from_millis(20));
    }
}
