//! Metric id canonicalization.
//!
//! Devices regenerate metric ids on every run, so the display name is the
//! only stable key. The canonicalizer maps each display name to one id that
//! is shared by every source and every run, recording the mapping in the
//! template it is handed.

use crate::{CanonicalId, Template};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Length of a name digest id before collision extension
const NAME_DIGEST_LEN: usize = 8;

/// How a fresh canonical id is derived for an unseen display name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanonicalIdPolicy {
    /// Hex prefix of SHA-256(display name); independent of merge order
    #[default]
    NameDigest,
    /// `m0001`, `m0002`, ... in first-seen order
    Sequential,
    /// Raw id cut to half the sibling count, extended on collision
    TruncatedRawId,
    /// Raw id verbatim, suffixed on collision
    RawId,
}

impl fmt::Display for CanonicalIdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NameDigest => "name-digest",
            Self::Sequential => "sequential",
            Self::TruncatedRawId => "truncated-raw-id",
            Self::RawId => "raw-id",
        };
        f.write_str(name)
    }
}

impl FromStr for CanonicalIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name-digest" => Ok(Self::NameDigest),
            "sequential" => Ok(Self::Sequential),
            "truncated-raw-id" => Ok(Self::TruncatedRawId),
            "raw-id" => Ok(Self::RawId),
            other => Err(format!("unknown canonical id policy: {}", other)),
        }
    }
}

/// Resolves display names to canonical ids
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricCanonicalizer {
    policy: CanonicalIdPolicy,
}

impl MetricCanonicalizer {
    /// Create a canonicalizer with the given policy
    pub fn new(policy: CanonicalIdPolicy) -> Self {
        Self { policy }
    }

    /// Policy in use
    pub fn policy(&self) -> CanonicalIdPolicy {
        self.policy
    }

    /// Canonical id for `display_name`, adding a template entry if needed.
    ///
    /// `sibling_count` is the number of metrics in the record the name came
    /// from; only the truncation policy uses it.
    pub fn resolve(
        &self,
        template: &mut Template,
        raw_id: &str,
        display_name: &str,
        sibling_count: usize,
    ) -> CanonicalId {
        if let Some(id) = template.id_for(display_name) {
            return id.clone();
        }

        let id = match self.policy {
            CanonicalIdPolicy::NameDigest => name_digest_id(template, display_name),
            CanonicalIdPolicy::Sequential => sequential_id(template),
            CanonicalIdPolicy::TruncatedRawId => truncated_id(template, raw_id, sibling_count),
            CanonicalIdPolicy::RawId => raw_id_or_suffixed(template, raw_id),
        };

        template.insert(id.clone(), display_name);
        debug!("Mapped metric '{}' (raw id {}) to {}", display_name, raw_id, id);
        id
    }
}

fn name_digest_id(template: &Template, display_name: &str) -> CanonicalId {
    let digest = hex::encode(Sha256::digest(display_name.as_bytes()));
    for len in NAME_DIGEST_LEN..=digest.len() {
        let candidate = &digest[..len];
        if !template.contains_id(candidate) {
            return candidate.to_string();
        }
    }
    suffixed(template, &digest)
}

fn sequential_id(template: &Template) -> CanonicalId {
    let mut n = template.len() + 1;
    loop {
        let candidate = format!("m{:04}", n);
        if !template.contains_id(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn truncated_id(template: &Template, raw_id: &str, sibling_count: usize) -> CanonicalId {
    let chars: Vec<char> = raw_id.chars().collect();
    if chars.is_empty() {
        return suffixed(template, "m");
    }

    let start = (sibling_count / 2).clamp(1, chars.len());
    for len in start..=chars.len() {
        let candidate: String = chars[..len].iter().collect();
        if !template.contains_id(&candidate) {
            return candidate;
        }
    }
    suffixed(template, raw_id)
}

fn raw_id_or_suffixed(template: &Template, raw_id: &str) -> CanonicalId {
    if raw_id.is_empty() {
        return suffixed(template, "m");
    }
    if !template.contains_id(raw_id) {
        return raw_id.to_string();
    }
    suffixed(template, raw_id)
}

/// First free `base-N` for N >= 2
fn suffixed(template: &Template, base: &str) -> CanonicalId {
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !template.contains_id(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
