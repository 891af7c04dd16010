//! Transmission payloads.
//!
//! A sender transmits its outgoing batch as a compact JSON
//! [`CanonicalStore`]. The aggregator turns it back into a
//! [`SourceDocument`] so that it flows through the same merge path as a
//! device export, with the sender's ids adopted under
//! [`CanonicalIdPolicy::RawId`](crate::CanonicalIdPolicy::RawId).

use crate::{CanonicalStore, MergeError, SourceDocument, SourceId};
use serde_json::{json, Map, Value};

impl CanonicalStore {
    /// Compact JSON payload for the wire
    pub fn to_payload(&self) -> Result<Vec<u8>, MergeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a received payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, MergeError> {
        serde_json::from_slice(payload).map_err(|e| MergeError::MalformedPacket(e.to_string()))
    }

    /// Export-shaped view of this store.
    ///
    /// Each metric is written with its template name. A metric id without a
    /// template entry is written without a name, so the merge rejects that
    /// record instead of inventing one.
    pub fn to_source_document(&self, source: impl Into<SourceId>) -> SourceDocument {
        let teams: Map<String, Value> = self
            .teams
            .iter()
            .map(|(team, bucket)| {
                let records: Vec<Value> = bucket
                    .iter()
                    .map(|record| {
                        let metrics: Map<String, Value> = record
                            .iter()
                            .map(|(id, value)| {
                                let metric = match self.template.name_of(id) {
                                    Some(name) => json!({ "name": name, "value": value }),
                                    None => json!({ "value": value }),
                                };
                                (id.clone(), metric)
                            })
                            .collect();
                        json!({ "metrics": metrics })
                    })
                    .collect();
                (team.clone(), Value::Array(records))
            })
            .collect();

        SourceDocument::new(source, json!({ "teams": teams }))
    }
}
