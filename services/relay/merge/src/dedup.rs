//! Transmission-scope deduplication state.
//!
//! Merge-scope membership lives in each [`TeamBucket`](crate::TeamBucket);
//! this module holds the team-scoped fingerprints a sender has already
//! delivered, persisted together with the sender's template.

use crate::{Fingerprint, Template};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fingerprints already transmitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenFingerprints(BTreeSet<Fingerprint>);

impl SeenFingerprints {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the fingerprint has not been seen
    pub fn is_new(&self, fingerprint: &Fingerprint) -> bool {
        !self.0.contains(fingerprint)
    }

    /// Record a fingerprint; returns true if it was new
    pub fn mark_seen(&mut self, fingerprint: Fingerprint) -> bool {
        self.0.insert(fingerprint)
    }

    /// Forget every fingerprint
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Number of fingerprints held
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing has been seen
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in fingerprint order
    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.0.iter()
    }
}

impl Extend<Fingerprint> for SeenFingerprints {
    fn extend<I: IntoIterator<Item = Fingerprint>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl FromIterator<Fingerprint> for SeenFingerprints {
    fn from_iter<I: IntoIterator<Item = Fingerprint>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Persisted sender-side state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalCache {
    /// Transmission-scope fingerprints
    #[serde(default)]
    pub cache: SeenFingerprints,
    /// Canonical ids the sender has assigned so far
    #[serde(default)]
    pub template: Template,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    fn fingerprint(n: i64) -> Fingerprint {
        let mut record = Record::new();
        record.insert("m1", n);
        record.fingerprint()
    }

    #[test]
    fn test_mark_and_clear() {
        let mut seen = SeenFingerprints::new();
        let fp = fingerprint(1);

        assert!(seen.is_new(&fp));
        assert!(seen.mark_seen(fp));
        assert!(!seen.mark_seen(fp));
        assert!(!seen.is_new(&fp));

        seen.clear();
        assert!(seen.is_new(&fp));
        seen.clear();
        assert!(seen.is_empty());
    }

    #[test]
    fn test_local_cache_format() {
        let mut cache = LocalCache::default();
        cache.cache.mark_seen(fingerprint(7));
        cache.template.insert("m1", "Auto Points");

        let value = serde_json::to_value(&cache).unwrap();
        assert_eq!(value["cache"][0], fingerprint(7).to_hex());
        assert_eq!(value["template"]["m1"], "Auto Points");

        let parsed: LocalCache = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, cache);
    }

    #[test]
    fn test_local_cache_missing_fields_default() {
        let parsed: LocalCache = serde_json::from_str("{}").unwrap();
        assert!(parsed.cache.is_empty());
        assert!(parsed.template.is_empty());
    }
}
