//! Read access to the relational store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::record::{RecordKey, RecordRef, key_text};

/// The subset of a relational store the engine reads from.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetches one record. A missing record is `Ok(None)`.
    async fn get_by_key(&self, model: &str, key: &RecordKey)
    -> Result<Option<RecordRef>, StoreError>;

    /// Fetches the records with the given keys, in any order. Missing keys
    /// are skipped.
    async fn get_many(
        &self,
        model: &str,
        keys: &[RecordKey],
    ) -> Result<Vec<RecordRef>, StoreError> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.get_by_key(model, key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// A page of records in a stable order.
    async fn fetch_page(
        &self,
        model: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RecordRef>, StoreError>;

    /// Number of records of `model`.
    async fn count(&self, model: &str) -> Result<u64, StoreError>;
}

/// A record store held in memory, in insertion order per model.
#[derive(Debug, Default)]
pub struct MemoryStore {
    models: RwLock<HashMap<String, Vec<RecordRef>>>,
}

impl MemoryStore {
    /// Creates an empty instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, replacing any record with the same key.
    pub fn insert(&self, record: RecordRef) {
        let mut models = self.models.write();
        let records = models.entry(record.model_name().to_string()).or_default();
        let key = key_text(&record.primary_key());
        match records
            .iter_mut()
            .find(|r| key_text(&r.primary_key()) == key)
        {
            Some(slot) => *slot = record,
            None => records.push(record),
        }
    }

    /// Removes and returns the record with key `key`.
    pub fn remove(&self, model: &str, key: &RecordKey) -> Option<RecordRef> {
        let mut models = self.models.write();
        let records = models.get_mut(model)?;
        let position = records
            .iter()
            .position(|r| key_text(&r.primary_key()) == key_text(key))?;
        Some(records.remove(position))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_by_key(
        &self,
        model: &str,
        key: &RecordKey,
    ) -> Result<Option<RecordRef>, StoreError> {
        let wanted = key_text(key);
        Ok(self.models.read().get(model).and_then(|records| {
            records
                .iter()
                .find(|r| key_text(&r.primary_key()) == wanted)
                .cloned()
        }))
    }

    async fn fetch_page(
        &self,
        model: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RecordRef>, StoreError> {
        Ok(self
            .models
            .read()
            .get(model)
            .map(|records| records.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, model: &str) -> Result<u64, StoreError> {
        Ok(self
            .models
            .read()
            .get(model)
            .map(|records| records.len() as u64)
            .unwrap_or(0))
    }
}
