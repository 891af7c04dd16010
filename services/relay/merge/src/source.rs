//! Raw source documents as exported by collection devices.
//!
//! An export has the shape
//! `{"teams": {team: [{"metrics": {raw_id: {"name": .., "value": ..}}}]}}`.
//! Other keys at any level are ignored.

use crate::{MergeError, MetricValue, SourceId};
use serde_json::{Map, Value};

/// One device export, or one received transmission converted to export shape
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Where the document came from
    pub source: SourceId,
    /// Parsed document body
    pub body: Value,
}

/// A metric of a raw record, before canonicalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawMetric<'a> {
    /// Per-export metric id
    pub raw_id: &'a str,
    /// Display name
    pub name: &'a str,
    /// Flattened value
    pub value: MetricValue,
}

impl SourceDocument {
    /// Wrap an already parsed body
    pub fn new(source: impl Into<SourceId>, body: Value) -> Self {
        Self {
            source: source.into(),
            body,
        }
    }

    /// Parse export text
    pub fn parse(source: impl Into<SourceId>, text: &str) -> Result<Self, MergeError> {
        let body =
            serde_json::from_str(text).map_err(|e| MergeError::SourceUnparsable(e.to_string()))?;
        Ok(Self::new(source, body))
    }

    /// Team entries of the document.
    ///
    /// Fails when `teams` is missing or not an object, or when any team's
    /// entry is not a list.
    pub fn teams(&self) -> Result<Vec<(&str, &[Value])>, MergeError> {
        let teams = self
            .body
            .get("teams")
            .and_then(Value::as_object)
            .ok_or_else(|| MergeError::SourceUnparsable("missing 'teams' object".to_string()))?;

        teams
            .iter()
            .map(|(team, records)| match records.as_array() {
                Some(records) => Ok((team.as_str(), records.as_slice())),
                None => Err(MergeError::SourceUnparsable(format!(
                    "team '{}' entry is not a list",
                    team
                ))),
            })
            .collect()
    }

    /// Number of raw records, zero if the document is unparsable
    pub fn record_count(&self) -> usize {
        self.teams()
            .map(|teams| teams.iter().map(|(_, records)| records.len()).sum())
            .unwrap_or(0)
    }
}

/// Extract the metrics of one raw record.
///
/// A metric without a `value` is read as `null`, i.e. empty text.
pub fn parse_raw_record(record: &Value) -> Result<Vec<RawMetric<'_>>, MergeError> {
    let metrics: &Map<String, Value> = record
        .get("metrics")
        .and_then(Value::as_object)
        .ok_or_else(|| MergeError::RecordSchema("missing 'metrics' object".to_string()))?;

    metrics
        .iter()
        .map(|(raw_id, metric)| {
            let name = metric
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    MergeError::RecordSchema(format!("metric '{}' has no name", raw_id))
                })?;
            let value = MetricValue::from_raw(metric.get("value").unwrap_or(&Value::Null))
                .map_err(|e| MergeError::RecordSchema(format!("metric '{}': {}", name, e)))?;
            Ok(RawMetric {
                raw_id: raw_id.as_str(),
                name,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            SourceDocument::parse("tablet", "{\"teams\":"),
            Err(MergeError::SourceUnparsable(_))
        ));
    }

    #[test]
    fn test_teams_shape() {
        let doc = SourceDocument::new("t", json!({"teams": {"254": [{}, {}], "1678": []}}));
        let teams = doc.teams().unwrap();
        assert_eq!(teams.len(), 2);
        assert_eq!(doc.record_count(), 2);

        let missing = SourceDocument::new("t", json!({"scouts": {}}));
        assert!(missing.teams().is_err());
        assert_eq!(missing.record_count(), 0);

        let not_list = SourceDocument::new("t", json!({"teams": {"254": {"a": 1}}}));
        assert!(not_list.teams().is_err());
    }

    #[test]
    fn test_parse_raw_record() {
        let record = json!({
            "metrics": {
                "a1": {"name": "Auto Points", "value": 12},
                "b2": {"name": "Cycle Times", "value": [1.5, 2.25]},
                "c3": {"name": "Header", "type": 5}
            }
        });

        let metrics = parse_raw_record(&record).unwrap();
        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics[0].name, "Auto Points");
        assert_eq!(metrics[0].value, MetricValue::Integer(12));
        assert_eq!(metrics[1].value, MetricValue::Text("1.5,2.25".to_string()));
        assert_eq!(metrics[2].value, MetricValue::Text(String::new()));
    }

    #[test]
    fn test_raw_record_schema_errors() {
        for bad in [
            json!({"scouter": "amy"}),
            json!({"metrics": [1, 2]}),
            json!({"metrics": {"a1": {"value": 3}}}),
            json!({"metrics": {"a1": {"name": "Notes", "value": {"x": 1}}}}),
        ] {
            assert!(matches!(
                parse_raw_record(&bad),
                Err(MergeError::RecordSchema(_))
            ));
        }
    }
}
