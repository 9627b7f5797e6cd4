//! The search-engine side of synchronization.
//!
//! Documents turn records into [`BulkOperation`]s and hand them to an
//! [`IndexSink`]. The sink reports per-operation outcomes in a
//! [`BulkReport`]; only transport-level problems are errors.
//!
//! Two sinks ship with the crate:
//!
//! - [`MemorySink`]: applies operations to in-process indices and records
//!   every submission
//! - `ElasticsearchSink`: talks to Elasticsearch or OpenSearch (requires
//!   the `elasticsearch` feature)

mod memory;

#[cfg(feature = "elasticsearch")]
mod elasticsearch;

pub use memory::{MemorySink, SinkCall};

#[cfg(feature = "elasticsearch")]
pub use self::elasticsearch::{ElasticsearchSink, ElasticsearchSinkConfig};

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};
use tracing::warn;

use crate::error::SinkError;
use crate::record::RecordKey;

/// The bulk action applied to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    /// Create or replace the document.
    #[default]
    Index,
    /// Partially update an existing document.
    Update,
    /// Remove the document.
    Delete,
}

impl BulkAction {
    /// The bulk API action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Update => "update",
            BulkAction::Delete => "delete",
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    /// Bulk action.
    #[serde(rename = "_op_type")]
    pub op_type: BulkAction,
    /// Document identifier.
    #[serde(rename = "_id")]
    pub id: RecordKey,
    /// Document body; absent for deletes.
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Map<String, Json>>,
    /// Target index.
    #[serde(rename = "_index")]
    pub index: String,
}

/// When the engine should make submitted changes visible to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Refresh {
    /// Refresh the affected shards immediately.
    #[default]
    True,
    /// Do not refresh.
    False,
    /// Wait for the next scheduled refresh before returning.
    WaitFor,
}

impl Refresh {
    /// The value of the `refresh` request parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Refresh::True => "true",
            Refresh::False => "false",
            Refresh::WaitFor => "wait_for",
        }
    }
}

impl fmt::Display for Refresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Refresh {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Refresh::True),
            "false" | "0" | "no" => Ok(Refresh::False),
            "wait_for" => Ok(Refresh::WaitFor),
            other => Err(format!("invalid refresh policy '{}'", other)),
        }
    }
}

impl From<bool> for Refresh {
    fn from(refresh: bool) -> Self {
        if refresh { Refresh::True } else { Refresh::False }
    }
}

// Serialized the way the engine's `refresh` parameter is written: a boolean
// or the string "wait_for".
impl Serialize for Refresh {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Refresh::True => serializer.serialize_bool(true),
            Refresh::False => serializer.serialize_bool(false),
            Refresh::WaitFor => serializer.serialize_str("wait_for"),
        }
    }
}

impl<'de> Deserialize<'de> for Refresh {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Flag(flag) => Ok(flag.into()),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Per-request options for bulk submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOptions {
    /// The `refresh` parameter; omitted from the request when `None`.
    pub refresh: Option<Refresh>,
}

/// Chunking and concurrency of parallel bulk submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelBulkOptions {
    /// Maximum concurrent bulk requests.
    pub workers: usize,
    /// Operations per bulk request.
    pub chunk_size: usize,
}

impl Default for ParallelBulkOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            chunk_size: 500,
        }
    }
}

/// An operation the engine rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemFailure {
    /// Document identifier.
    pub id: RecordKey,
    /// Bulk action.
    pub op_type: BulkAction,
    /// Index name.
    pub index: String,
    /// HTTP status of the item.
    pub status: u16,
    /// Engine error reason.
    pub reason: String,
}

/// Outcome of a bulk submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    /// Number of operations the engine accepted.
    pub succeeded: usize,
    /// Operations the engine rejected.
    pub failures: Vec<BulkItemFailure>,
}

impl BulkReport {
    /// Total number of operations submitted.
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    /// Whether every operation was accepted.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: BulkReport) {
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }
}

/// A search engine that accepts bulk requests and manages indices.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Submits operations as a single bulk request.
    async fn bulk(
        &self,
        operations: Vec<BulkOperation>,
        options: &BulkOptions,
    ) -> Result<BulkReport, SinkError>;

    /// Submits operations in chunks with bounded concurrency.
    ///
    /// The default splits `operations` into chunks of `parallel.chunk_size`
    /// and runs at most `parallel.workers` [`bulk`](Self::bulk) calls at a
    /// time. Chunk completion order is unspecified. Every chunk is
    /// submitted even when one fails; the first transport error is returned
    /// after the remaining chunks finish.
    async fn parallel_bulk(
        &self,
        operations: Vec<BulkOperation>,
        options: &BulkOptions,
        parallel: &ParallelBulkOptions,
    ) -> Result<BulkReport, SinkError> {
        let chunk_size = parallel.chunk_size.max(1);
        let chunks: Vec<Vec<BulkOperation>> = operations
            .chunks(chunk_size)
            .map(<[BulkOperation]>::to_vec)
            .collect();

        let mut pending = stream::iter(chunks)
            .map(|chunk| self.bulk(chunk, options))
            .buffer_unordered(parallel.workers.max(1));

        let mut report = BulkReport::default();
        let mut first_error = None;
        let mut failed_chunks = 0usize;
        while let Some(result) = pending.next().await {
            match result {
                Ok(chunk_report) => report.merge(chunk_report),
                Err(e) => {
                    failed_chunks += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                warn!(
                    failed_chunks,
                    succeeded = report.succeeded,
                    failures = report.failures.len(),
                    error = %e,
                    "Parallel bulk partially applied"
                );
                Err(e)
            }
            None => Ok(report),
        }
    }

    /// Creates an index with the given settings and mappings body.
    async fn create_index(&self, name: &str, body: Json) -> Result<(), SinkError>;

    /// Deletes an index. Deleting a missing index is not an error.
    async fn delete_index(&self, name: &str) -> Result<(), SinkError>;

    /// Whether an index named `name` exists.
    async fn index_exists(&self, name: &str) -> Result<bool, SinkError>;
}
