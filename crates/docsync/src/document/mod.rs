//! Document types: search-engine mappings bound to a model.
//!
//! A document is declared with a [`DocumentDefinition`] and becomes a
//! [`DocumentType`] when it is registered with the
//! [`DocumentRegistry`](crate::DocumentRegistry). Registration validates the
//! declaration and turns the listed model fields into index fields.
//!
//! # Example
//!
//! ```rust
//! use helios_docsync::document::DocumentType;
//! use helios_docsync::fields::{Field, ModelFieldKind, ModelSchema};
//! use helios_docsync::IndexDefinition;
//! use serde_json::json;
//!
//! let car = ModelSchema::new("Car")
//!     .field("name", ModelFieldKind::Char)
//!     .field("price", ModelFieldKind::Float);
//!
//! let definition = DocumentType::declare("CarDocument")
//!     .model(car)
//!     .index(IndexDefinition::new("cars"))
//!     .field("color", Field::text())
//!     .model_fields(["name", "price"])
//!     .prepare("color", |_| json!("blue"));
//! ```

mod sync;

pub use sync::{Document, IndexEvent, UpdateOptions};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value as Json, json};
use tracing::debug;

use crate::config::SyncSettings;
use crate::error::{HookError, RegistryError};
use crate::fields::{Field, ModelSchema, PrepareFn};
use crate::index::IndexDefinition;
use crate::record::{RecordKey, RecordRef, Value};
use crate::sink::Refresh;

/// Author-supplied behavior of a document type.
///
/// Every method has a default, so an empty `impl DocumentHooks for X {}` is
/// a valid hook set.
#[async_trait]
pub trait DocumentHooks: Send + Sync {
    /// Maps a changed record of a related model to the records of this
    /// document's model that embed it.
    ///
    /// Returning `Ok(None)` means the related record does not affect this
    /// document. [`HookError::RecordMissing`] is treated the same way.
    async fn instances_from_related(
        &self,
        _related: &RecordRef,
    ) -> Result<Option<Vec<RecordRef>>, HookError> {
        Ok(None)
    }

    /// Whether a record should be sent to the index at all.
    fn should_index(&self, _record: &RecordRef) -> bool {
        true
    }

    /// The search-engine `_id` of a record. Defaults to its primary key.
    fn generate_id(&self, record: &RecordRef) -> RecordKey {
        record.primary_key()
    }
}

/// Hooks with every method left at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl DocumentHooks for DefaultHooks {}

/// Settings of a document type that may change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentSettings {
    /// Skip this document when store events are propagated.
    pub ignore_signals: bool,
    /// Default refresh policy of updates.
    pub auto_refresh: Refresh,
}

/// A document declaration, validated at registration.
pub struct DocumentDefinition {
    name: String,
    model: Option<Arc<ModelSchema>>,
    index: Option<IndexDefinition>,
    fields: Vec<(String, Field)>,
    model_fields: Vec<String>,
    prepare: HashMap<String, PrepareFn>,
    hooks: Arc<dyn DocumentHooks>,
    ignore_signals: Option<bool>,
    auto_refresh: Option<Refresh>,
    related_models: Vec<String>,
    queryset_pagination: Option<usize>,
}

impl DocumentDefinition {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            index: None,
            fields: Vec::new(),
            model_fields: Vec::new(),
            prepare: HashMap::new(),
            hooks: Arc::new(DefaultHooks),
            ignore_signals: None,
            auto_refresh: None,
            related_models: Vec::new(),
            queryset_pagination: None,
        }
    }

    /// Binds the document to a model type.
    pub fn model(mut self, model: impl Into<Arc<ModelSchema>>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Binds the document to an index.
    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.index = Some(index);
        self
    }

    /// Declares an index field. Its attribute path defaults to `name`.
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Lists model columns to map automatically.
    pub fn model_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_fields.extend(names.into_iter().map(Into::into));
        self
    }

    /// Overrides how the field `name` is computed from a record.
    pub fn prepare<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Json + Send + Sync + 'static,
    {
        self.prepare.insert(name.into(), Arc::new(f));
        self
    }

    /// Installs the hooks used to resolve related records and filter records.
    pub fn hooks(mut self, hooks: impl DocumentHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Skip this document when store events are propagated.
    pub fn ignore_signals(mut self, ignore: bool) -> Self {
        self.ignore_signals = Some(ignore);
        self
    }

    /// Refresh policy used when an update does not pass one explicitly.
    pub fn auto_refresh(mut self, refresh: Refresh) -> Self {
        self.auto_refresh = Some(refresh);
        self
    }

    /// Models whose changes affect this document.
    pub fn related_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related_models.extend(models.into_iter().map(Into::into));
        self
    }

    /// Page size for population and chunk size for sequential submission.
    pub fn queryset_pagination(mut self, page_size: usize) -> Self {
        self.queryset_pagination = Some(page_size);
        self
    }

    /// The document name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validates the declaration and builds the document type.
    ///
    /// Nothing is registered when this fails.
    pub(crate) fn build(self, settings: &SyncSettings) -> Result<DocumentType, RegistryError> {
        let configuration = |message: &str| RegistryError::Configuration {
            subject: self.name.clone(),
            message: message.to_string(),
        };
        let model = self
            .model
            .clone()
            .ok_or_else(|| configuration("no model is bound to the document"))?;
        let index = self
            .index
            .clone()
            .ok_or_else(|| configuration("no index is bound to the document"))?;

        let mut fields: Vec<(String, Field)> = self
            .fields
            .into_iter()
            .map(|(name, field)| {
                let field = field.with_default_path(&name);
                (name, field)
            })
            .collect();

        for name in &self.model_fields {
            if fields.iter().any(|(declared, _)| declared == name) {
                return Err(RegistryError::RedeclaredField {
                    document: self.name.clone(),
                    field: name.clone(),
                });
            }
            let kind = model
                .get_field(name)
                .ok_or_else(|| RegistryError::UnknownModelField {
                    model: model.name().to_string(),
                    field: name.clone(),
                })?;
            let field = kind
                .to_field(name)
                .ok_or_else(|| RegistryError::ModelFieldNotMapped {
                    document: self.name.clone(),
                    field: name.clone(),
                    kind: kind.to_string(),
                })?;
            fields.push((name.clone(), field));
        }

        debug!(
            document = %self.name,
            model = %model.name(),
            fields = fields.len(),
            "Built document type"
        );

        Ok(DocumentType {
            index: index.with_defaults(&settings.index_settings),
            model,
            fields,
            prepare: self.prepare,
            hooks: self.hooks,
            related_models: self.related_models,
            queryset_pagination: self.queryset_pagination,
            settings: RwLock::new(DocumentSettings {
                ignore_signals: self.ignore_signals.unwrap_or(false),
                auto_refresh: self.auto_refresh.unwrap_or(settings.auto_refresh),
            }),
            name: self.name,
        })
    }
}

impl fmt::Debug for DocumentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentDefinition")
            .field("name", &self.name)
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("index", &self.index.as_ref().map(|i| i.name().to_string()))
            .field("model_fields", &self.model_fields)
            .finish_non_exhaustive()
    }
}

/// A registered document type.
pub struct DocumentType {
    name: String,
    model: Arc<ModelSchema>,
    index: IndexDefinition,
    fields: Vec<(String, Field)>,
    prepare: HashMap<String, PrepareFn>,
    hooks: Arc<dyn DocumentHooks>,
    related_models: Vec<String>,
    queryset_pagination: Option<usize>,
    settings: RwLock<DocumentSettings>,
}

impl DocumentType {
    /// Starts a document declaration.
    pub fn declare(name: impl Into<String>) -> DocumentDefinition {
        DocumentDefinition::new(name)
    }

    /// The name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The model schema this document indexes.
    pub fn model(&self) -> &ModelSchema {
        &self.model
    }

    /// Name of the model this document indexes.
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// The index this document is stored in.
    pub fn index(&self) -> &IndexDefinition {
        &self.index
    }

    /// Declared fields followed by mapped model fields.
    pub fn fields(&self) -> &[(String, Field)] {
        &self.fields
    }

    /// Looks up a declared field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub(crate) fn prepare_override(&self, name: &str) -> Option<&PrepareFn> {
        self.prepare.get(name)
    }

    /// The installed hooks.
    pub fn hooks(&self) -> &dyn DocumentHooks {
        self.hooks.as_ref()
    }

    /// Models whose changes re-index this document.
    pub fn related_models(&self) -> &[String] {
        &self.related_models
    }

    /// Whether changes to `model` affect this document.
    pub fn is_related_to(&self, model: &str) -> bool {
        self.related_models.iter().any(|m| m == model)
    }

    /// Page size of sequential submissions, if any.
    pub fn queryset_pagination(&self) -> Option<usize> {
        self.queryset_pagination
    }

    /// A snapshot of the runtime-mutable settings.
    pub fn settings(&self) -> DocumentSettings {
        *self.settings.read()
    }

    /// Whether store events are ignored.
    pub fn ignore_signals(&self) -> bool {
        self.settings.read().ignore_signals
    }

    /// Toggles whether store events are ignored.
    pub fn set_ignore_signals(&self, ignore: bool) {
        self.settings.write().ignore_signals = ignore;
    }

    /// The current default refresh policy.
    pub fn auto_refresh(&self) -> Refresh {
        self.settings.read().auto_refresh
    }

    /// Changes the default refresh policy.
    pub fn set_auto_refresh(&self, refresh: Refresh) {
        self.settings.write().auto_refresh = refresh;
    }

    /// Mapping properties of every field.
    pub fn properties(&self) -> Map<String, Json> {
        self.fields
            .iter()
            .map(|(name, field)| (name.clone(), field.mapping()))
            .collect()
    }

    /// The engine mapping of this document.
    pub fn mapping(&self) -> Json {
        json!({ "properties": self.properties() })
    }
}

impl fmt::Debug for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentType")
            .field("name", &self.name)
            .field("model", &self.model.name())
            .field("index", &self.index.name())
            .field("fields", &self.fields.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("related_models", &self.related_models)
            .field("settings", &self.settings())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::ModelFieldKind;

    fn car_model() -> ModelSchema {
        ModelSchema::new("Car")
            .field("name", ModelFieldKind::Char)
            .field("price", ModelFieldKind::Float)
            .field("manufacturer", ModelFieldKind::ForeignKey)
    }

    fn definition() -> DocumentDefinition {
        DocumentType::declare("CarDocument")
            .model(car_model())
            .index(IndexDefinition::new("cars"))
            .field("color", Field::text())
            .field("type", Field::keyword().attr("kind"))
    }

    #[test]
    fn test_build_maps_model_fields() {
        let doc = definition()
            .model_fields(["name", "price"])
            .build(&SyncSettings::default())
            .unwrap();

        let names: Vec<&str> = doc.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["color", "type", "name", "price"]);
        assert_eq!(
            doc.mapping(),
            json!({"properties": {
                "color": {"type": "text"},
                "type": {"type": "keyword"},
                "name": {"type": "text"},
                "price": {"type": "double"}
            }})
        );
        assert_eq!(doc.field("type").unwrap().path(), Some(&["kind".to_string()][..]));
    }

    #[test]
    fn test_build_defaults() {
        let doc = definition().build(&SyncSettings::default()).unwrap();
        assert!(!doc.ignore_signals());
        assert_eq!(doc.auto_refresh(), Refresh::True);
        assert!(doc.related_models().is_empty());
        assert_eq!(doc.queryset_pagination(), None);

        let settings = SyncSettings {
            auto_refresh: Refresh::False,
            ..Default::default()
        };
        let doc = definition().build(&settings).unwrap();
        assert_eq!(doc.auto_refresh(), Refresh::False);
    }

    #[test]
    fn test_build_merges_index_settings() {
        let mut settings = SyncSettings::default();
        settings.index_settings.insert("number_of_shards".to_string(), json!(1));
        let doc = definition().build(&settings).unwrap();
        assert_eq!(doc.index().settings().get("number_of_shards"), Some(&json!(1)));
    }

    #[test]
    fn test_redeclared_field() {
        let err = definition()
            .model_fields(["color"])
            .build(&SyncSettings::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::RedeclaredField { field, .. } if field == "color"));
    }

    #[test]
    fn test_unmapped_model_field() {
        let err = definition()
            .model_fields(["manufacturer"])
            .build(&SyncSettings::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::ModelFieldNotMapped { kind, .. } if kind == "ForeignKey"));
    }

    #[test]
    fn test_unknown_model_field() {
        let err = definition()
            .model_fields(["wheels"])
            .build(&SyncSettings::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownModelField { .. }));
    }

    #[test]
    fn test_missing_index() {
        let err = DocumentType::declare("CarDocument")
            .model(car_model())
            .build(&SyncSettings::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Configuration { .. }));
    }

    #[test]
    fn test_runtime_settings() {
        let doc = definition().build(&SyncSettings::default()).unwrap();
        doc.set_ignore_signals(true);
        doc.set_auto_refresh(Refresh::WaitFor);
        assert_eq!(
            doc.settings(),
            DocumentSettings {
                ignore_signals: true,
                auto_refresh: Refresh::WaitFor
            }
        );
    }
}
