//! Canonical data model: metric values, records, templates and the store.

use crate::{Fingerprint, MergeError};
use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::warn;

/// Team identifier as it appears in exports (e.g. "254")
pub type TeamId = String;

/// Stable metric id assigned by the canonicalizer
pub type CanonicalId = String;

/// Opaque identifier of the device or payload a document came from
pub type SourceId = String;

/// A scalar metric value.
///
/// Raw arrays are flattened into comma-joined text before they reach this
/// type, so a canonical record never holds nested data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Checkbox style metric
    Bool(bool),
    /// Counter style metric
    Integer(i64),
    /// Non-integral number
    Float(f64),
    /// Free text, selections and flattened lists
    Text(String),
}

impl MetricValue {
    /// Convert a raw export value into a scalar.
    ///
    /// Arrays become a comma-joined string of their flattened elements and
    /// `null` becomes empty text. Objects are rejected.
    pub fn from_raw(value: &Value) -> Result<Self, MergeError> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => Ok(Self::from_number(n)),
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Null => Ok(Self::Text(String::new())),
            Value::Array(items) => Ok(Self::Text(flatten(items)?)),
            Value::Object(_) => Err(MergeError::RecordSchema(
                "metric value is an object".to_string(),
            )),
        }
    }

    fn from_number(n: &serde_json::Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Integer(i)
        } else if let Some(f) = n.as_f64() {
            Self::Float(f)
        } else {
            Self::Text(n.to_string())
        }
    }
}

fn flatten(items: &[Value]) -> Result<String, MergeError> {
    let parts = items
        .iter()
        .map(|item| MetricValue::from_raw(item).map(|v| v.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => match serde_json::Number::from_f64(*x) {
                Some(n) => write!(f, "{}", n),
                None => write!(f, "{}", x),
            },
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for MetricValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for MetricValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for MetricValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// One scouting observation, keyed by canonical metric id.
///
/// Key order never affects equality or the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<CanonicalId, MetricValue>);

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a metric value
    pub fn insert(&mut self, id: impl Into<CanonicalId>, value: impl Into<MetricValue>) {
        self.0.insert(id.into(), value.into());
    }

    /// Value of a metric
    pub fn get(&self, id: &str) -> Option<&MetricValue> {
        self.0.get(id)
    }

    /// Iterate over `(id, value)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalId, &MetricValue)> {
        self.0.iter()
    }

    /// Metric ids present in this record
    pub fn ids(&self) -> impl Iterator<Item = &CanonicalId> {
        self.0.keys()
    }

    /// Number of metrics
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no metrics are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Content fingerprint of this record
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

impl FromIterator<(CanonicalId, MetricValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (CanonicalId, MetricValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Bijection between canonical ids and display names.
///
/// Entries are only ever added; an id or name that is already mapped is
/// never remapped.
#[derive(Debug, Clone, Default)]
pub struct Template {
    entries: BTreeMap<CanonicalId, String>,
    by_name: HashMap<String, CanonicalId>,
}

impl Template {
    /// Create an empty template
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping. Returns false, leaving the template unchanged, when
    /// either the id or the name is already mapped.
    pub fn insert(&mut self, id: impl Into<CanonicalId>, name: impl Into<String>) -> bool {
        let id = id.into();
        let name = name.into();
        if self.entries.contains_key(&id) || self.by_name.contains_key(&name) {
            return false;
        }
        self.by_name.insert(name.clone(), id.clone());
        self.entries.insert(id, name);
        true
    }

    /// Add every mapping of `other` whose id and name are both unmapped here.
    ///
    /// Returns the number of mappings added.
    pub fn absorb(&mut self, other: &Template) -> usize {
        other
            .iter()
            .filter(|(id, name)| self.insert(id.as_str(), name.as_str()))
            .count()
    }

    /// Canonical id for a display name
    pub fn id_for(&self, name: &str) -> Option<&CanonicalId> {
        self.by_name.get(name)
    }

    /// Display name for a canonical id
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    /// True when the id is mapped
    pub fn contains_id(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Iterate over `(id, name)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalId, &String)> {
        self.entries.iter()
    }

    /// Display names in id order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.values()
    }

    /// Number of mappings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is mapped
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Template {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<CanonicalId, String>::deserialize(deserializer)?;
        // A hand-edited file may map one name twice; the lowest id keeps it.
        let mut template = Template::new();
        for (id, name) in entries {
            if !template.insert(id.as_str(), name.as_str()) {
                warn!(
                    "Template maps '{}' more than once; dropping id {} in favour of {}",
                    name,
                    id,
                    template.id_for(&name).map(String::as_str).unwrap_or("?")
                );
            }
        }
        Ok(template)
    }
}

/// Ordered, duplicate-free list of one team's records
#[derive(Debug, Clone, Default)]
pub struct TeamBucket {
    records: Vec<Record>,
    fingerprints: HashSet<Fingerprint>,
}

impl TeamBucket {
    /// Create an empty bucket
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record unless an equal one is already present.
    ///
    /// Returns the record's fingerprint when it was appended.
    pub fn push(&mut self, record: Record) -> Option<Fingerprint> {
        let fingerprint = record.fingerprint();
        if !self.fingerprints.insert(fingerprint) {
            return None;
        }
        self.records.push(record);
        Some(fingerprint)
    }

    /// True when a record with this fingerprint is present
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Records in insertion order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Iterate over records in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the bucket holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<Record>> for TeamBucket {
    fn from(records: Vec<Record>) -> Self {
        let mut bucket = TeamBucket::new();
        for record in records {
            bucket.push(record);
        }
        bucket
    }
}

impl PartialEq for TeamBucket {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl Serialize for TeamBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.records.len()))?;
        for record in &self.records {
            seq.serialize_element(record)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TeamBucket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Record>::deserialize(deserializer).map(TeamBucket::from)
    }
}

/// The merged, deduplicated result: team buckets plus the template that
/// names every metric id they use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStore {
    /// Records grouped by team
    #[serde(default)]
    pub teams: BTreeMap<TeamId, TeamBucket>,
    /// Names for every canonical id used by the records
    #[serde(default)]
    pub template: Template,
}

impl CanonicalStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket for a team, if any
    pub fn bucket(&self, team: &str) -> Option<&TeamBucket> {
        self.teams.get(team)
    }

    /// Bucket for a team, created empty if absent
    pub fn bucket_mut(&mut self, team: &str) -> &mut TeamBucket {
        self.teams.entry(team.to_string()).or_default()
    }

    /// Total records across all teams
    pub fn record_count(&self) -> usize {
        self.teams.values().map(TeamBucket::len).sum()
    }

    /// True when no team holds any record
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Drop teams whose bucket is empty
    pub fn prune_empty_teams(&mut self) {
        self.teams.retain(|_, bucket| !bucket.is_empty());
    }

    /// Fingerprints of every record, in team then insertion order
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.teams
            .values()
            .flat_map(|bucket| bucket.iter().map(Record::fingerprint))
            .collect()
    }

    /// Canonical ids used by records but missing from the template
    pub fn unnamed_ids(&self) -> Vec<CanonicalId> {
        let mut missing: Vec<CanonicalId> = self
            .teams
            .values()
            .flat_map(|bucket| bucket.iter())
            .flat_map(|record| record.ids())
            .filter(|id| !self.template.contains_id(id))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metric_value_from_raw() {
        assert_eq!(
            MetricValue::from_raw(&json!(true)).unwrap(),
            MetricValue::Bool(true)
        );
        assert_eq!(
            MetricValue::from_raw(&json!(12)).unwrap(),
            MetricValue::Integer(12)
        );
        assert_eq!(
            MetricValue::from_raw(&json!(1.5)).unwrap(),
            MetricValue::Float(1.5)
        );
        assert_eq!(
            MetricValue::from_raw(&json!(null)).unwrap(),
            MetricValue::Text(String::new())
        );
        assert!(matches!(
            MetricValue::from_raw(&json!({"nested": 1})),
            Err(MergeError::RecordSchema(_))
        ));
    }

    #[test]
    fn test_arrays_flatten_to_comma_joined_text() {
        assert_eq!(
            MetricValue::from_raw(&json!([1.5, 2.25, 3])).unwrap(),
            MetricValue::Text("1.5,2.25,3".to_string())
        );
        assert_eq!(
            MetricValue::from_raw(&json!(["left", true, null, [1, 2]])).unwrap(),
            MetricValue::Text("left,true,,1,2".to_string())
        );
        assert_eq!(
            MetricValue::from_raw(&json!([])).unwrap(),
            MetricValue::Text(String::new())
        );
        assert!(MetricValue::from_raw(&json!([{"a": 1}])).is_err());
    }

    #[test]
    fn test_metric_value_display() {
        assert_eq!(MetricValue::Bool(false).to_string(), "false");
        assert_eq!(MetricValue::Integer(-3).to_string(), "-3");
        assert_eq!(MetricValue::Float(12.0).to_string(), "12.0");
        assert_eq!(MetricValue::Float(0.25).to_string(), "0.25");
        assert_eq!(MetricValue::from("Climb").to_string(), "Climb");
    }

    #[test]
    fn test_record_serde_is_flat_map() {
        let mut record = Record::new();
        record.insert("b", 2i64);
        record.insert("a", "x");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"a":"x","b":2}"#);

        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_template_is_a_bijection() {
        let mut template = Template::new();
        assert!(template.insert("m1", "Auto Points"));
        assert!(!template.insert("m1", "Teleop Points"));
        assert!(!template.insert("m2", "Auto Points"));
        assert!(template.insert("m2", "Teleop Points"));

        assert_eq!(template.id_for("Auto Points").unwrap(), "m1");
        assert_eq!(template.name_of("m2"), Some("Teleop Points"));
        assert_eq!(template.len(), 2);
    }

    #[test]
    fn test_template_absorb_never_remaps() {
        let mut ours = Template::new();
        ours.insert("m1", "Auto Points");

        let mut theirs = Template::new();
        theirs.insert("x9", "Auto Points");
        theirs.insert("m1", "Climb");
        theirs.insert("m2", "Notes");

        assert_eq!(ours.absorb(&theirs), 1);
        assert_eq!(ours.id_for("Auto Points").unwrap(), "m1");
        assert_eq!(ours.name_of("m1"), Some("Auto Points"));
        assert_eq!(ours.name_of("m2"), Some("Notes"));
        assert!(ours.id_for("Climb").is_none());
    }

    #[test]
    fn test_template_load_keeps_first_mapping_of_duplicate_name() {
        let template: Template =
            serde_json::from_str(r#"{"b":"Climb","a":"Climb","c":"Park"}"#).unwrap();
        assert_eq!(template.len(), 2);
        assert_eq!(template.id_for("Climb").unwrap(), "a");
        assert!(!template.contains_id("b"));
    }

    #[test]
    fn test_records_using_dropped_template_id_are_reported() {
        let store: CanonicalStore = serde_json::from_str(
            r#"{"template":{"b":"Climb","a":"Climb"},"teams":{"254":[{"b":"deep"}]}}"#,
        )
        .unwrap();
        assert_eq!(store.unnamed_ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_bucket_rejects_duplicates() {
        let mut record = Record::new();
        record.insert("m1", 3i64);

        let mut bucket = TeamBucket::new();
        assert!(bucket.push(record.clone()).is_some());
        assert!(bucket.push(record.clone()).is_none());
        assert_eq!(bucket.len(), 1);
        assert!(bucket.contains(&record.fingerprint()));
    }

    #[test]
    fn test_bucket_load_drops_duplicates() {
        let bucket: TeamBucket =
            serde_json::from_str(r#"[{"m1":1},{"m1":2},{"m1":1}]"#).unwrap();
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.records()[1].get("m1"), Some(&MetricValue::Integer(2)));
    }

    #[test]
    fn test_store_prune_and_unnamed_ids() {
        let mut store = CanonicalStore::new();
        store.template.insert("m1", "Auto Points");
        let mut record = Record::new();
        record.insert("m1", 1i64);
        record.insert("m9", 1i64);
        store.bucket_mut("254").push(record);
        store.bucket_mut("1678");

        assert_eq!(store.teams.len(), 2);
        store.prune_empty_teams();
        assert_eq!(store.teams.len(), 1);
        assert_eq!(store.unnamed_ids(), vec!["m9".to_string()]);
        assert_eq!(store.record_count(), 1);
    }
}
