//! The merge engine.
//!
//! Folds source documents into a [`CanonicalStore`]: every raw record is
//! parsed, canonicalized, fingerprinted and appended to its team bucket
//! unless an equal record is already there. Failures are contained to the
//! record or source that caused them and reported.

use crate::source::parse_raw_record;
use crate::{
    CanonicalIdPolicy, CanonicalStore, Fingerprint, MergeError, MetricCanonicalizer, Record,
    SeenFingerprints, SourceDocument, SourceId, TeamId, Template,
};
use serde_json::Value;
use tracing::{debug, warn};

/// A raw record that could not be merged
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRejection {
    /// Source of the record
    pub source: SourceId,
    /// Team the record was filed under
    pub team: TeamId,
    /// Position in the team's raw list
    pub index: usize,
    /// Why it was rejected
    pub reason: String,
}

/// A source skipped entirely
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRejection {
    /// Skipped source
    pub source: SourceId,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of one merge cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Records appended to the store
    pub appended: usize,
    /// Records already present in their team bucket
    pub duplicates: usize,
    /// Records skipped because they were already transmitted
    pub previously_sent: usize,
    /// Records that failed schema checks
    pub rejected: Vec<RecordRejection>,
    /// Sources skipped as a whole
    pub skipped_sources: Vec<SourceRejection>,
    /// Team-scoped fingerprints of the appended records, in merge order
    pub accepted: Vec<Fingerprint>,
}

impl MergeReport {
    /// True when nothing was appended
    pub fn is_empty(&self) -> bool {
        self.appended == 0
    }
}

/// Folds source documents into a canonical store
#[derive(Debug, Clone, Copy, Default)]
pub struct Merger {
    canonicalizer: MetricCanonicalizer,
}

impl Merger {
    /// Create a merger with the given canonicalizer
    pub fn new(canonicalizer: MetricCanonicalizer) -> Self {
        Self { canonicalizer }
    }

    /// Create a merger with a canonicalizer using `policy`
    pub fn with_policy(policy: CanonicalIdPolicy) -> Self {
        Self::new(MetricCanonicalizer::new(policy))
    }

    /// Canonicalizer in use
    pub fn canonicalizer(&self) -> &MetricCanonicalizer {
        &self.canonicalizer
    }

    /// Merge `sources` into `store`.
    ///
    /// Records whose team-scoped fingerprint is in `exclude` are skipped as
    /// previously sent. The store is only ever appended to.
    pub fn apply(
        &self,
        store: &mut CanonicalStore,
        sources: &[SourceDocument],
        exclude: Option<&SeenFingerprints>,
    ) -> MergeReport {
        let mut report = MergeReport::default();

        for source in sources {
            let teams = match source.teams() {
                Ok(teams) => teams,
                Err(e) => {
                    warn!("Skipping source {}: {}", source.source, e);
                    report.skipped_sources.push(SourceRejection {
                        source: source.source.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for (team, raw_records) in teams {
                for (index, raw) in raw_records.iter().enumerate() {
                    let record = match self.canonicalize(&mut store.template, raw) {
                        Ok(record) => record,
                        Err(e) => {
                            warn!(
                                "Rejected record {} of team {} from {}: {}",
                                index, team, source.source, e
                            );
                            report.rejected.push(RecordRejection {
                                source: source.source.clone(),
                                team: team.to_string(),
                                index,
                                reason: e.to_string(),
                            });
                            continue;
                        }
                    };

                    let fingerprint = record.fingerprint();
                    if store
                        .bucket(team)
                        .map_or(false, |bucket| bucket.contains(&fingerprint))
                    {
                        report.duplicates += 1;
                        continue;
                    }
                    let scoped = fingerprint.scoped(team);
                    if exclude.map_or(false, |seen| !seen.is_new(&scoped)) {
                        report.previously_sent += 1;
                        continue;
                    }

                    store.bucket_mut(team).push(record);
                    report.appended += 1;
                    report.accepted.push(scoped);
                }
            }
        }

        debug!(
            "Merged {} sources: {} appended, {} duplicate, {} previously sent, {} rejected",
            sources.len(),
            report.appended,
            report.duplicates,
            report.previously_sent,
            report.rejected.len()
        );
        report
    }

    /// Canonicalize one raw record against `template`.
    ///
    /// The record is fully parsed before any id is resolved, so a rejected
    /// record leaves the template untouched.
    pub fn canonicalize(&self, template: &mut Template, raw: &Value) -> Result<Record, MergeError> {
        let metrics = parse_raw_record(raw)?;
        let sibling_count = metrics.len();

        Ok(metrics
            .into_iter()
            .map(|metric| {
                let id = self.canonicalizer.resolve(
                    template,
                    metric.raw_id,
                    metric.name,
                    sibling_count,
                );
                (id, metric.value)
            })
            .collect())
    }
}
