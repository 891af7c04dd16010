//! Record model, fingerprinting, metric canonicalization and merge engine.
//!
//! Collection devices export loosely schematized records whose metric ids are
//! regenerated per run. This crate folds any number of such exports into one
//! canonical store keyed by stable metric ids, never duplicating a record.
//!
//! ## Components
//!
//! - **Hasher** ([`Fingerprint`]): order-independent SHA-256 digest of a record
//! - **Canonicalizer** ([`MetricCanonicalizer`]): display name to stable id
//! - **Deduplicator** ([`SeenFingerprints`], [`TeamBucket`]): transmission
//!   scope and merge scope membership
//! - **Merger** ([`Merger`]): the fold itself
//!
//! ## Example
//!
//! ```rust
//! use relay_merge::{CanonicalStore, Merger, SourceDocument};
//!
//! let export = r#"{"teams":{"254":[{"metrics":{"a1":{"name":"Auto Points","value":12}}}]}}"#;
//! let source = SourceDocument::parse("tablet-1", export).unwrap();
//!
//! let mut store = CanonicalStore::default();
//! let report = Merger::default().apply(&mut store, &[source], None);
//!
//! assert_eq!(report.appended, 1);
//! assert_eq!(store.record_count(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod merger;
pub mod model;
pub mod source;
pub mod transmission;

// Re-export main types
pub use canonical::{CanonicalIdPolicy, MetricCanonicalizer};
pub use dedup::{LocalCache, SeenFingerprints};
pub use error::MergeError;
pub use fingerprint::Fingerprint;
pub use merger::{MergeReport, Merger, RecordRejection, SourceRejection};
pub use model::{
    CanonicalId, CanonicalStore, MetricValue, Record, SourceId, TeamBucket, TeamId, Template,
};
pub use source::{RawMetric, SourceDocument};
