//! CSV export of the canonical store.
//!
//! One header row (`Team Number` then every template name in id order) and
//! one row per record. Every field is quoted and lines end in CRLF, so the
//! file opens cleanly in spreadsheet tools.

use crate::backend::file::write_atomic;
use crate::StorageError;
use relay_merge::{CanonicalId, CanonicalStore, TeamId};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

const TEAM_COLUMN: &str = "Team Number";

/// A record that could not be exported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Team of the record
    pub team: TeamId,
    /// Position of the record in its team bucket
    pub index: usize,
    /// First template id the record has no value for
    pub metric: CanonicalId,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record {} of team {} has no value for metric {}",
            self.index, self.team, self.metric
        )
    }
}

/// Outcome of an export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    /// Data rows written
    pub rows: usize,
    /// Records skipped for missing metrics
    pub errors: Vec<RowError>,
}

/// Render the store as CSV text
pub fn render_csv(store: &CanonicalStore) -> (String, ExportReport) {
    let mut out = String::new();
    let mut report = ExportReport::default();

    let header = std::iter::once(TEAM_COLUMN).chain(store.template.names().map(String::as_str));
    push_row(&mut out, header);

    let ids: Vec<&CanonicalId> = store.template.iter().map(|(id, _)| id).collect();
    for (team, bucket) in &store.teams {
        'records: for (index, record) in bucket.iter().enumerate() {
            let mut fields = Vec::with_capacity(ids.len() + 1);
            fields.push(team.clone());
            for id in &ids {
                match record.get(id) {
                    Some(value) => fields.push(value.to_string()),
                    None => {
                        report.errors.push(RowError {
                            team: team.clone(),
                            index,
                            metric: (*id).clone(),
                        });
                        continue 'records;
                    }
                }
            }
            push_row(&mut out, fields.iter().map(String::as_str));
            report.rows += 1;
        }
    }

    (out, report)
}

/// Render the store and atomically replace `path` with the result
pub fn write_csv(store: &CanonicalStore, path: &Path) -> Result<ExportReport, StorageError> {
    let (content, report) = render_csv(store);
    write_atomic(path, content.as_bytes())
        .map_err(|e| StorageError::Export(format!("{}: {}", path.display(), e)))?;

    for error in &report.errors {
        warn!("Export skipped a row: {}", error);
    }
    info!("Exported {} rows to {}", report.rows, path.display());
    Ok(report)
}

fn push_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    }
    out.push_str("\r\n");
}
