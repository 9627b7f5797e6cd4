use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value as Json};
use tracing::debug;

use super::{
    BulkAction, BulkItemFailure, BulkOperation, BulkOptions, BulkReport, IndexSink,
    ParallelBulkOptions, Refresh,
};
use crate::error::SinkError;
use crate::record::key_text;

/// A submission received by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
// Variants mirror the `IndexSink` methods and their arguments
#[allow(missing_docs)]
pub enum SinkCall {
    Bulk {
        operations: Vec<BulkOperation>,
        refresh: Option<Refresh>,
    },
    ParallelBulk {
        operations: Vec<BulkOperation>,
        refresh: Option<Refresh>,
    },
    CreateIndex {
        name: String,
        body: Json,
    },
    DeleteIndex {
        name: String,
    },
}

#[derive(Debug, Default)]
struct MemoryIndex {
    body: Option<Json>,
    documents: BTreeMap<String, Map<String, Json>>,
}

/// An in-process search engine.
///
/// Bulk operations are applied to per-index document maps keyed by `_id`.
/// Indexing into an unknown index creates it. Updates and deletes of
/// missing documents are reported as 404 failures. Every call is recorded
/// and can be inspected with [`MemorySink::calls`].
#[derive(Debug, Default)]
pub struct MemorySink {
    indices: RwLock<HashMap<String, MemoryIndex>>,
    calls: RwLock<Vec<SinkCall>>,
}

impl MemorySink {
    /// Creates an empty instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.read().clone()
    }

    /// Operations of every sequential bulk call, one entry per call.
    pub fn bulk_calls(&self) -> Vec<Vec<BulkOperation>> {
        self.calls
            .read()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Bulk { operations, .. } => Some(operations.clone()),
                _ => None,
            })
            .collect()
    }

    /// Operations of every parallel bulk call, one entry per call.
    pub fn parallel_calls(&self) -> Vec<Vec<BulkOperation>> {
        self.calls
            .read()
            .iter()
            .filter_map(|call| match call {
                SinkCall::ParallelBulk { operations, .. } => Some(operations.clone()),
                _ => None,
            })
            .collect()
    }

    /// Refresh parameter of the most recent bulk call, sequential or parallel.
    pub fn last_refresh(&self) -> Option<Option<Refresh>> {
        self.calls.read().iter().rev().find_map(|call| match call {
            SinkCall::Bulk { refresh, .. } | SinkCall::ParallelBulk { refresh, .. } => {
                Some(*refresh)
            }
            _ => None,
        })
    }

    /// The stored source of a document.
    pub fn document(&self, index: &str, id: &Json) -> Option<Map<String, Json>> {
        self.indices
            .read()
            .get(index)
            .and_then(|idx| idx.documents.get(&key_text(id)).cloned())
    }

    /// Number of documents stored in an index.
    pub fn count(&self, index: &str) -> usize {
        self.indices
            .read()
            .get(index)
            .map(|idx| idx.documents.len())
            .unwrap_or(0)
    }

    /// The create-index body an index was created with.
    pub fn index_body(&self, index: &str) -> Option<Json> {
        self.indices.read().get(index).and_then(|idx| idx.body.clone())
    }

    fn apply(&self, operations: &[BulkOperation]) -> BulkReport {
        let mut indices = self.indices.write();
        let mut report = BulkReport::default();

        for operation in operations {
            let id = key_text(&operation.id);
            let outcome = match operation.op_type {
                BulkAction::Index => {
                    let index = indices.entry(operation.index.clone()).or_default();
                    index
                        .documents
                        .insert(id, operation.source.clone().unwrap_or_default());
                    Ok(())
                }
                BulkAction::Update => {
                    match indices
                        .get_mut(&operation.index)
                        .and_then(|index| index.documents.get_mut(&id))
                    {
                        Some(existing) => {
                            for (key, value) in operation.source.clone().unwrap_or_default() {
                                existing.insert(key, value);
                            }
                            Ok(())
                        }
                        None => Err("document_missing_exception"),
                    }
                }
                BulkAction::Delete => {
                    match indices
                        .get_mut(&operation.index)
                        .and_then(|index| index.documents.remove(&id))
                    {
                        Some(_) => Ok(()),
                        None => Err("not_found"),
                    }
                }
            };

            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(reason) => report.failures.push(BulkItemFailure {
                    id: operation.id.clone(),
                    op_type: operation.op_type,
                    index: operation.index.clone(),
                    status: 404,
                    reason: reason.to_string(),
                }),
            }
        }

        report
    }
}

#[async_trait]
impl IndexSink for MemorySink {
    async fn bulk(
        &self,
        operations: Vec<BulkOperation>,
        options: &BulkOptions,
    ) -> Result<BulkReport, SinkError> {
        let report = self.apply(&operations);
        debug!(
            operations = operations.len(),
            failures = report.failures.len(),
            "Applied bulk request"
        );
        self.calls.write().push(SinkCall::Bulk {
            operations,
            refresh: options.refresh,
        });
        Ok(report)
    }

    // Recorded as a single call so callers can tell parallel submissions apart.
    async fn parallel_bulk(
        &self,
        operations: Vec<BulkOperation>,
        options: &BulkOptions,
        _parallel: &ParallelBulkOptions,
    ) -> Result<BulkReport, SinkError> {
        let report = self.apply(&operations);
        self.calls.write().push(SinkCall::ParallelBulk {
            operations,
            refresh: options.refresh,
        });
        Ok(report)
    }

    async fn create_index(&self, name: &str, body: Json) -> Result<(), SinkError> {
        let mut indices = self.indices.write();
        if indices.get(name).is_some_and(|index| index.body.is_some()) {
            return Err(SinkError::Rejected {
                status: 400,
                message: format!("resource_already_exists_exception: index [{}]", name),
            });
        }
        indices.entry(name.to_string()).or_default().body = Some(body.clone());
        drop(indices);

        self.calls.write().push(SinkCall::CreateIndex {
            name: name.to_string(),
            body,
        });
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), SinkError> {
        self.indices.write().remove(name);
        self.calls.write().push(SinkCall::DeleteIndex {
            name: name.to_string(),
        });
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, SinkError> {
        Ok(self.indices.read().contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(op_type: BulkAction, id: i64, source: Option<Json>) -> BulkOperation {
        BulkOperation {
            op_type,
            id: json!(id),
            source: source.and_then(|s| s.as_object().cloned()),
            index: "cars".to_string(),
        }
    }

    #[tokio::test]
    async fn test_index_update_delete() {
        let sink = MemorySink::new();
        let report = sink
            .bulk(
                vec![
                    op(BulkAction::Index, 1, Some(json!({"name": "Prius", "price": 1}))),
                    op(BulkAction::Update, 1, Some(json!({"price": 2}))),
                    op(BulkAction::Index, 2, Some(json!({"name": "Civic"}))),
                    op(BulkAction::Delete, 2, None),
                ],
                &BulkOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded, 4);
        assert_eq!(
            sink.document("cars", &json!(1)),
            json!({"name": "Prius", "price": 2}).as_object().cloned()
        );
        assert_eq!(sink.count("cars"), 1);
    }

    #[tokio::test]
    async fn test_missing_documents_are_failures() {
        let sink = MemorySink::new();
        let report = sink
            .bulk(
                vec![
                    op(BulkAction::Update, 1, Some(json!({"price": 2}))),
                    op(BulkAction::Delete, 2, None),
                ],
                &BulkOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].reason, "document_missing_exception");
    }

    #[tokio::test]
    async fn test_calls_are_recorded() {
        let sink = MemorySink::new();
        let options = BulkOptions {
            refresh: Some(Refresh::WaitFor),
        };
        sink.bulk(vec![op(BulkAction::Index, 1, Some(json!({})))], &options)
            .await
            .unwrap();
        sink.parallel_bulk(
            vec![op(BulkAction::Index, 2, Some(json!({})))],
            &BulkOptions::default(),
            &ParallelBulkOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(sink.bulk_calls().len(), 1);
        assert_eq!(sink.parallel_calls().len(), 1);
        assert_eq!(sink.last_refresh(), Some(None));
        assert_eq!(sink.count("cars"), 2);
    }

    #[tokio::test]
    async fn test_index_lifecycle() {
        let sink = MemorySink::new();
        assert!(!sink.index_exists("cars").await.unwrap());

        sink.create_index("cars", json!({"settings": {}})).await.unwrap();
        assert!(sink.index_exists("cars").await.unwrap());
        assert!(sink.create_index("cars", json!({})).await.is_err());

        sink.delete_index("cars").await.unwrap();
        assert!(!sink.index_exists("cars").await.unwrap());
        sink.delete_index("cars").await.unwrap();
    }
}
