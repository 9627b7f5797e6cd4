//! Mapping search hits back to store records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{SyncError, SyncResult};
use crate::record::{RecordKey, RecordRef, key_text};
use crate::store::RecordStore;

/// Document identifiers returned by a search, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    model: String,
    ids: Vec<RecordKey>,
}

impl SearchResults {
    /// Creates an empty instance.
    pub fn new(model: impl Into<String>, ids: Vec<RecordKey>) -> Self {
        Self {
            model: model.into(),
            ids,
        }
    }

    /// Reads the `_id` of every hit in a search response body.
    pub fn from_response(model: impl Into<String>, response: &Json) -> Self {
        let ids = response
            .pointer("/hits/hits")
            .and_then(Json::as_array)
            .map(|hits| hits.iter().filter_map(|hit| hit.get("_id").cloned()).collect())
            .unwrap_or_default();
        Self::new(model, ids)
    }

    /// The model the hits belong to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Hit identifiers, best first.
    pub fn ids(&self) -> &[RecordKey] {
        &self.ids
    }

    /// Keeps the records that appear in the results.
    ///
    /// Keys are compared by their string form, since engines return `_id`s
    /// as strings. With `keep_order` the records are sorted by rank;
    /// otherwise their input order is kept.
    pub fn filter_records(
        &self,
        model: &str,
        records: Vec<RecordRef>,
        keep_order: bool,
    ) -> SyncResult<Vec<RecordRef>> {
        if model != self.model {
            return Err(SyncError::TypeMismatch {
                expected: self.model.clone(),
                actual: model.to_string(),
            });
        }

        let rank: HashMap<String, usize> = self
            .ids
            .iter()
            .enumerate()
            .map(|(position, id)| (key_text(id), position))
            .collect();

        let mut matched: Vec<(usize, RecordRef)> = records
            .into_iter()
            .filter(|record| record.model_name() == model)
            .filter_map(|record| {
                rank.get(&key_text(&record.primary_key()))
                    .map(|position| (*position, record))
            })
            .collect();

        if keep_order {
            matched.sort_by_key(|(position, _)| *position);
        }
        Ok(matched.into_iter().map(|(_, record)| record).collect())
    }

    /// Fetches the matching records from the store.
    pub async fn to_records(
        &self,
        store: &dyn RecordStore,
        keep_order: bool,
    ) -> SyncResult<Vec<RecordRef>> {
        let records = store.get_many(&self.model, &self.ids).await?;
        self.filter_records(&self.model, records, keep_order)
    }
}
