//! Turning records into bulk operations and submitting them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tokio::sync::broadcast;
use tracing::debug;

use super::DocumentType;
use crate::error::{LookupError, SyncError, SyncResult};
use crate::fields::{Field, PrepareFn};
use crate::record::{RecordRef, Value};
use crate::sink::{
    BulkAction, BulkOperation, BulkOptions, BulkReport, IndexSink, ParallelBulkOptions, Refresh,
};

/// Options of a single update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOptions {
    /// The bulk action applied to each record.
    pub action: BulkAction,
    /// Explicit refresh policy; overrides the document's `auto_refresh`.
    pub refresh: Option<Refresh>,
    /// Submit through [`IndexSink::parallel_bulk`].
    pub parallel: bool,
    /// Turn per-operation failures into [`SyncError::PartialFailure`].
    pub raise_on_error: bool,
}

impl UpdateOptions {
    /// Options for indexing records.
    pub fn index() -> Self {
        Self::default()
    }

    /// Options for removing records from the index.
    pub fn delete() -> Self {
        Self::default().with_action(BulkAction::Delete)
    }

    /// Sets the bulk action.
    pub fn with_action(mut self, action: BulkAction) -> Self {
        self.action = action;
        self
    }

    /// Sets the refresh policy of submissions.
    pub fn with_refresh(mut self, refresh: impl Into<Refresh>) -> Self {
        self.refresh = Some(refresh.into());
        self
    }

    /// Submit through the sink's parallel bulk helper.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Fail with `PartialFailure` when any operation is rejected.
    pub fn with_raise_on_error(mut self, raise: bool) -> Self {
        self.raise_on_error = raise;
        self
    }
}

/// Notification sent after operations were submitted for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEvent {
    /// Name of the document type.
    pub document: String,
    /// Index the operations were sent to.
    pub index: String,
    /// The action applied.
    pub action: BulkAction,
    /// Number of operations submitted.
    pub operations: usize,
    /// Number of operations the engine rejected.
    pub failures: usize,
}

enum Preparer {
    Override(PrepareFn),
    Extract(Field),
}

/// Synchronizes records of one document type with the index.
///
/// The list of prepared fields is computed once, when the synchronizer is
/// created. A synchronizer built with [`Document::ignoring`] treats the
/// given record as absent wherever it appears in a field path.
pub struct Document {
    doc_type: Arc<DocumentType>,
    sink: Arc<dyn IndexSink>,
    ignore: Option<Value>,
    parallel: ParallelBulkOptions,
    events: Option<broadcast::Sender<IndexEvent>>,
    prepared: Vec<(String, Preparer)>,
}

impl Document {
    /// A synchronizer with default parallel options and no event channel.
    pub fn new(doc_type: Arc<DocumentType>, sink: Arc<dyn IndexSink>) -> Self {
        let prepared = doc_type
            .fields()
            .iter()
            .filter_map(|(name, field)| {
                let preparer = match doc_type.prepare_override(name) {
                    Some(prepare) => Preparer::Override(Arc::clone(prepare)),
                    None if field.is_extractable() => Preparer::Extract(field.clone()),
                    None => return None,
                };
                Some((name.clone(), preparer))
            })
            .collect();

        Self {
            doc_type,
            sink,
            ignore: None,
            parallel: ParallelBulkOptions::default(),
            events: None,
            prepared,
        }
    }

    /// Treats `record` as absent during field resolution.
    pub fn ignoring(mut self, record: RecordRef) -> Self {
        self.ignore = Some(Value::Record(record));
        self
    }

    /// Overrides chunking and concurrency of parallel submissions.
    pub fn with_parallel_options(mut self, parallel: ParallelBulkOptions) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sends an [`IndexEvent`] on `events` after every submission.
    pub fn with_events(mut self, events: broadcast::Sender<IndexEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The document type being synchronized.
    pub fn doc_type(&self) -> &Arc<DocumentType> {
        &self.doc_type
    }

    /// Names of the fields written to `_source`, in order.
    pub fn prepared_fields(&self) -> impl Iterator<Item = &str> {
        self.prepared.iter().map(|(name, _)| name.as_str())
    }

    /// Computes the `_source` of a record.
    pub fn prepare(&self, record: &RecordRef) -> Result<Map<String, Json>, LookupError> {
        let value = Value::Record(Arc::clone(record));
        let mut source = Map::new();
        for (name, preparer) in &self.prepared {
            let prepared = match preparer {
                Preparer::Override(prepare) => prepare(&value),
                Preparer::Extract(field) => field.resolve(&value, self.ignore.as_ref())?,
            };
            source.insert(name.clone(), prepared);
        }
        Ok(source)
    }

    /// Builds the bulk operation for one record.
    pub fn operation(
        &self,
        record: &RecordRef,
        action: BulkAction,
    ) -> Result<BulkOperation, LookupError> {
        let source = match action {
            BulkAction::Delete => None,
            _ => Some(self.prepare(record)?),
        };
        Ok(BulkOperation {
            op_type: action,
            id: self.doc_type.hooks().generate_id(record),
            source,
            index: self.doc_type.index().name().to_string(),
        })
    }

    /// Builds bulk operations for every record the document should index.
    ///
    /// Fails on the first record with an unresolvable required field.
    pub fn operations(
        &self,
        records: &[RecordRef],
        action: BulkAction,
    ) -> Result<Vec<BulkOperation>, LookupError> {
        let hooks = self.doc_type.hooks();
        records
            .iter()
            .filter(|record| hooks.should_index(record))
            .map(|record| self.operation(record, action))
            .collect()
    }

    /// Indexes (or deletes, per `options.action`) the given records.
    ///
    /// All operations are built before anything is submitted, so a lookup
    /// failure leaves the index untouched.
    pub async fn update(
        &self,
        records: &[RecordRef],
        options: &UpdateOptions,
    ) -> SyncResult<BulkReport> {
        let operations = self.operations(records, options.action)?;
        self.submit(operations, options).await
    }

    /// [`update`](Self::update) for a single record.
    pub async fn update_one(
        &self,
        record: &RecordRef,
        options: &UpdateOptions,
    ) -> SyncResult<BulkReport> {
        self.update(std::slice::from_ref(record), options).await
    }

    /// Submits prebuilt operations to the sink.
    pub async fn submit(
        &self,
        operations: Vec<BulkOperation>,
        options: &UpdateOptions,
    ) -> SyncResult<BulkReport> {
        if operations.is_empty() {
            return Ok(BulkReport::default());
        }

        let bulk_options = BulkOptions {
            refresh: self.refresh_for(options),
        };
        let count = operations.len();

        let report = if options.parallel {
            self.sink
                .parallel_bulk(operations, &bulk_options, &self.parallel)
                .await?
        } else if let Some(page_size) = self.doc_type.queryset_pagination() {
            let mut report = BulkReport::default();
            for chunk in operations.chunks(page_size.max(1)) {
                report.merge(self.sink.bulk(chunk.to_vec(), &bulk_options).await?);
            }
            report
        } else {
            self.sink.bulk(operations, &bulk_options).await?
        };

        debug!(
            document = %self.doc_type.name(),
            index = %self.doc_type.index().name(),
            action = %options.action,
            operations = count,
            failures = report.failures.len(),
            "Submitted bulk operations"
        );

        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(IndexEvent {
                document: self.doc_type.name().to_string(),
                index: self.doc_type.index().name().to_string(),
                action: options.action,
                operations: count,
                failures: report.failures.len(),
            });
        }

        if options.raise_on_error && !report.is_success() {
            return Err(SyncError::PartialFailure(report));
        }
        Ok(report)
    }

    /// An explicit refresh wins; otherwise `auto_refresh`, omitted when false.
    fn refresh_for(&self, options: &UpdateOptions) -> Option<Refresh> {
        options.refresh.or(match self.doc_type.auto_refresh() {
            Refresh::False => None,
            auto => Some(auto),
        })
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("doc_type", &self.doc_type.name())
            .field("ignore", &self.ignore)
            .field("prepared", &self.prepared_fields().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
