//! Helios Document Sync
//!
//! This crate keeps search-engine indices consistent with records held in a
//! relational store. Document types declare how records of a model are
//! flattened into index documents; the registry binds them to models and
//! indices; signal processors react to store events by submitting bulk
//! operations through an [`IndexSink`](sink::IndexSink).
//!
//! # Architecture
//!
//! - [`record`] - Dynamic record values and the [`Record`] trait
//! - [`fields`] - Index field declarations and value extraction
//! - [`index`] - Index names and settings
//! - [`document`] - Document type declarations and bulk submission
//! - [`registry`] - Model, document and index bookkeeping
//! - [`signals`] - Real-time and deferred propagation of store events
//! - [`sink`] - Search engine clients (in-memory and Elasticsearch)
//! - [`store`] - Read access to the relational store
//! - [`reindex`] - Index creation and bulk population
//! - [`search`] - Mapping search hits back to records
//!
//! # Sink Features
//!
//! - `elasticsearch` - [`ElasticsearchSink`](sink::ElasticsearchSink) built on
//!   the official client, for Elasticsearch and OpenSearch clusters
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use helios_docsync::fields::{ModelFieldKind, ModelSchema};
//! use helios_docsync::{
//!     DocumentRegistry, DocumentType, DynamicRecord, Field, IndexDefinition, MemorySink,
//!     SyncSettings, UpdateOptions,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = Arc::new(MemorySink::new());
//! let mut registry = DocumentRegistry::new(SyncSettings::default(), sink.clone());
//!
//! registry
//!     .register_document(
//!         DocumentType::declare("CarDocument")
//!             .model(
//!                 ModelSchema::new("Car")
//!                     .field("name", ModelFieldKind::Char)
//!                     .field("price", ModelFieldKind::Float),
//!             )
//!             .index(IndexDefinition::new("cars").with_setting("number_of_shards", json!(1)))
//!             .field("color", Field::text())
//!             .model_fields(["name", "price"]),
//!     )
//!     .unwrap();
//!
//! let car = DynamicRecord::new("Car", 1)
//!     .with("name", "Type 57")
//!     .with("price", 5400.0)
//!     .with("color", "blue")
//!     .into_ref();
//!
//! registry.update(&car, &UpdateOptions::index()).await.unwrap();
//!
//! let source = sink.document("cars", &json!(1)).unwrap();
//! assert_eq!(source["color"], json!("blue"));
//! assert_eq!(source["name"], json!("Type 57"));
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod document;
pub mod error;
pub mod fields;
pub mod index;
pub mod record;
pub mod registry;
pub mod reindex;
pub mod search;
pub mod signals;
pub mod sink;
pub mod store;

// Re-export commonly used types at crate root
pub use config::{SignalProcessorKind, SyncSettings};
pub use document::{Document, DocumentHooks, DocumentType, IndexEvent, UpdateOptions};
pub use error::{SyncError, SyncResult};
pub use fields::Field;
pub use index::IndexDefinition;
pub use record::{DynamicRecord, Record, RecordKey, RecordRef, Value};
pub use registry::DocumentRegistry;
pub use reindex::{IndexManager, ReindexRequest};
pub use signals::{SignalProcessor, StoreEvent, signal_processor};
pub use sink::{BulkAction, BulkReport, IndexSink, MemorySink, Refresh};
pub use store::{MemoryStore, RecordStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initializes the tracing subscriber for logging.
///
/// This should be called once at application startup.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_docsync={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
