//! Error types for the synchronization engine.
//!
//! Each concern (registration, value lookup, the search-engine sink, the
//! record store, the task queue, document hooks) has its own error enum.
//! They all convert into [`SyncError`], which is what the public async
//! operations return.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::sink::BulkReport;

/// The primary error type for synchronization operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Document registration errors
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Value extraction errors
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// Search engine errors
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Record store errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Task queue errors
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Errors raised by document hooks
    #[error(transparent)]
    Hook(#[from] HookError),

    /// Some operations of a bulk submission were rejected and the caller
    /// asked for failures to be raised.
    #[error("{} of {} bulk operations failed", .0.failures.len(), .0.total())]
    PartialFailure(BulkReport),

    /// Records handed to the search filter belong to another model.
    #[error("unexpected record model (expected: {expected}, got: {actual})")]
    TypeMismatch { expected: String, actual: String },
}

/// Errors raised while declaring or registering documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The declaration is incomplete or inconsistent.
    #[error("improperly configured {subject}: {message}")]
    Configuration { subject: String, message: String },

    /// A model field name was also declared explicitly on the document.
    #[error("you cannot redeclare the field named '{field}' on {document}")]
    RedeclaredField { document: String, field: String },

    /// A model field has no index field equivalent.
    #[error("cannot convert model field '{field}' ({kind}) to an index field on {document}")]
    ModelFieldNotMapped {
        document: String,
        field: String,
        kind: String,
    },

    /// A listed model field does not exist on the model schema.
    #[error("model '{model}' has no field named '{field}'")]
    UnknownModelField { model: String, field: String },

    /// No document is registered under the given name.
    #[error("document '{name}' is not registered")]
    UnknownDocument { name: String },
}

/// A required field path could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed lookup for key [{segment}] in {record}")]
pub struct LookupError {
    /// The path segment that failed.
    pub segment: String,
    /// Description of the value the segment was applied to.
    pub record: String,
}

/// Errors reported by a search-engine sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The engine could not be reached or the connection failed.
    #[error("search engine transport error: {message}")]
    Transport { message: String },

    /// The engine answered with an error status for the whole request.
    #[error("search engine rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request or response body could not be (de)serialized.
    #[error("search engine serialization error: {message}")]
    Serialization { message: String },
}

/// Errors reported by a record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record store error: {message}")]
    Backend { message: String },

    #[error("record store has no model named '{model}'")]
    UnknownModel { model: String },
}

/// Errors reported by a task queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,

    #[error("failed to serialize job: {message}")]
    Serialization { message: String },
}

/// Errors raised by [`DocumentHooks`](crate::document::DocumentHooks).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    /// A record referenced by the hook no longer exists. Callers treat this
    /// as "nothing to do".
    #[error("record not found: {model}/{key}")]
    RecordMissing { model: String, key: String },

    #[error("document hook failed: {message}")]
    Failed { message: String },
}

/// Result type alias for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{BulkAction, BulkItemFailure};
    use serde_json::json;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::RedeclaredField {
            document: "CarDocument".to_string(),
            field: "name".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "you cannot redeclare the field named 'name' on CarDocument"
        );
    }

    #[test]
    fn test_lookup_error_display() {
        let err = LookupError {
            segment: "color".to_string(),
            record: "Car(1)".to_string(),
        };
        assert_eq!(err.to_string(), "failed lookup for key [color] in Car(1)");
    }

    #[test]
    fn test_error_conversion() {
        let err: SyncError = SinkError::Transport {
            message: "connection refused".to_string(),
        }
        .into();
        assert!(matches!(err, SyncError::Sink(_)));

        let err: SyncError = QueueError::Closed.into();
        assert_eq!(err.to_string(), "task queue is closed");
    }

    #[test]
    fn test_partial_failure_display() {
        let report = BulkReport {
            succeeded: 2,
            failures: vec![BulkItemFailure {
                id: json!(3),
                op_type: BulkAction::Delete,
                index: "cars".to_string(),
                status: 404,
                reason: "not_found".to_string(),
            }],
        };
        let err = SyncError::PartialFailure(report);
        assert_eq!(err.to_string(), "1 of 3 bulk operations failed");
    }
}
