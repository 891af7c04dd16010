//! Sentinel framing for the wire protocol.
//!
//! A frame is the payload with its trailing NUL bytes stripped, followed by
//! the sentinel. The sentinel must occur exactly once in a frame, at its
//! tail, so a reader can stop at the first occurrence.

use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// Sentinel used for bulk data and acknowledgments (4 bytes)
pub const BULK_SENTINEL: [u8; 4] = [0xFF, 0x32, 0x84, 0xFF];

/// Sentinel used by the probe variant of the receiver firmware (6 bytes)
pub const PROBE_SENTINEL: [u8; 6] = [0x00, 0xFF, 0x32, 0x84, 0xFF, 0x00];

/// End-of-packet marker shared by both ends of a logical channel.
///
/// Both ends of a link must be configured with the same value; it terminates
/// data packets in one direction and serves as the acknowledgment in the
/// other.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Sentinel(Bytes);

impl Sentinel {
    /// Build a sentinel from raw bytes
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self, WireError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(WireError::EmptySentinel);
        }
        Ok(Self(bytes))
    }

    /// The 4-byte bulk data sentinel
    pub fn bulk() -> Self {
        Self(Bytes::from_static(&BULK_SENTINEL))
    }

    /// The 6-byte probe sentinel
    pub fn probe() -> Self {
        Self(Bytes::from_static(&PROBE_SENTINEL))
    }

    /// Sentinel bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Sentinel length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; an empty sentinel cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Offset of the first occurrence of the sentinel in `haystack`
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        haystack
            .windows(self.0.len())
            .position(|window| window == self.0.as_ref())
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::bulk()
    }
}

impl fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sentinel({})", hex::encode(&self.0))
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.as_ref() == BULK_SENTINEL {
            f.write_str("bulk")
        } else if self.0.as_ref() == PROBE_SENTINEL {
            f.write_str("probe")
        } else {
            f.write_str(&hex::encode(&self.0))
        }
    }
}

impl FromStr for Sentinel {
    type Err = WireError;

    /// Accepts `bulk`, `probe`, or a hex string such as `ff3284ff`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bulk" => Ok(Self::bulk()),
            "probe" => Ok(Self::probe()),
            other => {
                let digits = other.strip_prefix("0x").unwrap_or(other);
                let bytes =
                    hex::decode(digits).map_err(|e| WireError::SentinelSpec(e.to_string()))?;
                Self::new(bytes)
            }
        }
    }
}

impl Serialize for Sentinel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Sentinel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let spec = String::deserialize(deserializer)?;
        spec.parse().map_err(serde::de::Error::custom)
    }
}

/// Encoder/decoder for sentinel-terminated frames
#[derive(Debug, Clone, Default)]
pub struct Framer {
    sentinel: Sentinel,
}

impl Framer {
    /// Create a framer for the given sentinel
    pub fn new(sentinel: Sentinel) -> Self {
        Self { sentinel }
    }

    /// Sentinel in use
    pub fn sentinel(&self) -> &Sentinel {
        &self.sentinel
    }

    /// Frame a payload: strip trailing NULs and append the sentinel
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, WireError> {
        let end = payload
            .iter()
            .rposition(|&b| b != 0)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let payload = &payload[..end];

        let mut buf = BytesMut::with_capacity(payload.len() + self.sentinel.len());
        buf.put_slice(payload);
        buf.put_slice(self.sentinel.as_bytes());

        // The first occurrence must be the terminating one; this also catches
        // a payload tail that fuses with the sentinel head.
        let tail = buf.len() - self.sentinel.len();
        match self.sentinel.find_in(&buf) {
            Some(offset) if offset < tail => return Err(WireError::EmbeddedSentinel(offset)),
            _ => {}
        }

        trace!("Framed {} payload bytes", payload.len());
        Ok(buf.freeze())
    }

    /// Strip the trailing sentinel from a received frame
    pub fn decode(&self, wire: &[u8]) -> Result<Bytes, WireError> {
        if wire.len() <= self.sentinel.len() {
            return Err(WireError::TooShort(wire.len()));
        }
        if !wire.ends_with(self.sentinel.as_bytes()) {
            return Err(WireError::MalformedFrame);
        }
        Ok(Bytes::copy_from_slice(
            &wire[..wire.len() - self.sentinel.len()],
        ))
    }

    /// True when `buf` ends with the sentinel
    pub fn is_terminated(&self, buf: &[u8]) -> bool {
        buf.ends_with(self.sentinel.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let framer = Framer::default();
        let payload = br#"{"teams":{"254":[{"m1":12}]},"template":{"m1":"Auto Points"}}"#;

        let framed = framer.encode(payload).unwrap();
        assert_eq!(framed.len(), payload.len() + BULK_SENTINEL.len());
        assert!(framed.ends_with(&BULK_SENTINEL));

        let decoded = framer.decode(&framed).unwrap();
        assert_eq!(decoded.as_ref(), payload.as_ref());
    }

    #[test]
    fn test_round_trip_probe_sentinel() {
        let framer = Framer::new(Sentinel::probe());
        let payload = b"{\"teams\":{}}";

        let framed = framer.encode(payload).unwrap();
        assert_eq!(framer.decode(&framed).unwrap().as_ref(), payload.as_ref());
    }

    #[test]
    fn test_encode_strips_trailing_nuls() {
        let framer = Framer::default();
        let framed = framer.encode(b"{}\0\0\0").unwrap();
        assert_eq!(framed.as_ref(), b"{}\xFF\x32\x84\xFF".as_ref());
    }

    #[test]
    fn test_encode_keeps_interior_nuls() {
        let framer = Framer::default();
        let framed = framer.encode(b"a\0b").unwrap();
        assert_eq!(framer.decode(&framed).unwrap().as_ref(), b"a\0b".as_ref());
    }

    #[test]
    fn test_encode_rejects_embedded_sentinel() {
        let framer = Framer::default();
        let mut payload = b"abc".to_vec();
        payload.extend_from_slice(&BULK_SENTINEL);
        payload.extend_from_slice(b"def");

        assert_eq!(
            framer.encode(&payload).unwrap_err(),
            WireError::EmbeddedSentinel(3)
        );
    }

    #[test]
    fn test_encode_rejects_tail_fusing_with_sentinel() {
        // "xFF 32 84" followed by "FF 32 84 FF" contains the sentinel one
        // byte early.
        let framer = Framer::default();
        let payload = [b'x', 0xFF, 0x32, 0x84];
        assert_eq!(
            framer.encode(&payload).unwrap_err(),
            WireError::EmbeddedSentinel(1)
        );
    }

    #[test]
    fn test_decode_too_short() {
        let framer = Framer::default();
        assert_eq!(
            framer.decode(&BULK_SENTINEL).unwrap_err(),
            WireError::TooShort(4)
        );
        assert_eq!(framer.decode(b"ab").unwrap_err(), WireError::TooShort(2));
    }

    #[test]
    fn test_decode_missing_sentinel() {
        let framer = Framer::default();
        assert_eq!(
            framer.decode(b"{\"teams\":{}}").unwrap_err(),
            WireError::MalformedFrame
        );
    }

    #[test]
    fn test_sentinel_parsing() {
        assert_eq!("bulk".parse::<Sentinel>().unwrap(), Sentinel::bulk());
        assert_eq!("PROBE".parse::<Sentinel>().unwrap(), Sentinel::probe());
        assert_eq!("0xff3284ff".parse::<Sentinel>().unwrap(), Sentinel::bulk());
        assert_eq!(
            "abcd".parse::<Sentinel>().unwrap().as_bytes(),
            &[0xAB, 0xCD]
        );
        assert!("zz".parse::<Sentinel>().is_err());
        assert_eq!("".parse::<Sentinel>().unwrap_err(), WireError::EmptySentinel);
    }

    #[test]
    fn test_sentinel_serde() {
        let json = serde_json::to_string(&Sentinel::probe()).unwrap();
        assert_eq!(json, "\"probe\"");

        let parsed: Sentinel = serde_json::from_str("\"a0b1\"").unwrap();
        assert_eq!(parsed.to_string(), "a0b1");
    }
}
