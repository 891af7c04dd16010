//! Record fingerprinting.
//!
//! A fingerprint is a SHA-256 digest over a canonical encoding of a record:
//! metrics in id order, each as a length-prefixed id followed by a type tag
//! and the value. Two records with the same metrics and values hash equally
//! whatever order their keys arrived in.

use crate::{MergeError, MetricValue, Record};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const TAG_BOOL: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;

/// Content hash of a record
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a record
    pub fn of(record: &Record) -> Self {
        let mut hasher = Sha256::new();
        for (id, value) in record.iter() {
            update_str(&mut hasher, id);
            match value {
                MetricValue::Bool(b) => {
                    hasher.update([TAG_BOOL, *b as u8]);
                }
                MetricValue::Integer(i) => {
                    hasher.update([TAG_INTEGER]);
                    hasher.update(i.to_le_bytes());
                }
                MetricValue::Float(x) => {
                    hasher.update([TAG_FLOAT]);
                    hasher.update(x.to_bits().to_le_bytes());
                }
                MetricValue::Text(s) => {
                    hasher.update([TAG_TEXT]);
                    update_str(&mut hasher, s);
                }
            }
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    /// Fingerprint of this record as filed under `team`.
    ///
    /// Transmission-scope state is keyed by this, so equal observations of
    /// two different teams are tracked separately.
    pub fn scoped(&self, team: &str) -> Self {
        let mut hasher = Sha256::new();
        update_str(&mut hasher, team);
        hasher.update(self.0);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

fn update_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| MergeError::Fingerprint(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, MetricValue)]) -> Record {
        pairs
            .iter()
            .map(|(id, v)| (id.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = record(&[
            ("m1", MetricValue::Integer(1)),
            ("m2", MetricValue::from("x")),
        ]);
        let b = record(&[
            ("m2", MetricValue::from("x")),
            ("m1", MetricValue::Integer(1)),
        ]);
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_value_type_matters() {
        let int = record(&[("m1", MetricValue::Integer(1))]);
        let text = record(&[("m1", MetricValue::from("1"))]);
        let boolean = record(&[("m1", MetricValue::Bool(true))]);
        assert_ne!(Fingerprint::of(&int), Fingerprint::of(&text));
        assert_ne!(Fingerprint::of(&int), Fingerprint::of(&boolean));
    }

    #[test]
    fn test_boundaries_are_unambiguous() {
        let a = record(&[("ab", MetricValue::from("c"))]);
        let b = record(&[("a", MetricValue::from("bc"))]);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_scoped_by_team() {
        let fp = Fingerprint::of(&record(&[("m1", MetricValue::Integer(0))]));
        assert_eq!(fp.scoped("254"), fp.scoped("254"));
        assert_ne!(fp.scoped("254"), fp.scoped("1678"));
        assert_ne!(fp.scoped("254"), fp);
    }

    #[test]
    fn test_hex_round_trip() {
        let fp = Fingerprint::of(&record(&[("m1", MetricValue::Float(2.5))]));
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex.parse::<Fingerprint>().unwrap(), fp);

        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", hex));
        assert!("abcd".parse::<Fingerprint>().is_err());
    }
}
