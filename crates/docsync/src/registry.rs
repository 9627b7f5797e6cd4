//! Document Registry.
//!
//! The registry records which document types index which model, which
//! models are *related* to which documents, and which documents share an
//! index. Registration happens through `&mut self` during startup; once the
//! registry is shared behind an `Arc` it is read-only, apart from the
//! auto-sync switch and the per-document runtime settings.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value as Json};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::SyncSettings;
use crate::document::{Document, DocumentDefinition, DocumentType, IndexEvent, UpdateOptions};
use crate::error::{HookError, RegistryError, SyncResult};
use crate::index::IndexDefinition;
use crate::record::{RecordRef, key_text};
use crate::sink::{BulkAction, BulkOperation, BulkReport, IndexSink};

/// An index and the document types stored in it.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    index: IndexDefinition,
    documents: Vec<Arc<DocumentType>>,
}

impl IndexEntry {
    /// The index definition.
    pub fn index(&self) -> &IndexDefinition {
        &self.index
    }

    /// The name.
    pub fn name(&self) -> &str {
        self.index.name()
    }

    /// Document types stored in this index.
    pub fn documents(&self) -> &[Arc<DocumentType>] {
        &self.documents
    }

    /// Mapping properties of every document sharing the index.
    pub fn properties(&self) -> Map<String, Json> {
        let mut properties = Map::new();
        for doc_type in &self.documents {
            properties.extend(doc_type.properties());
        }
        properties
    }

    /// The create-index request body.
    pub fn body(&self) -> Json {
        self.index.body(self.properties())
    }
}

/// Registry of document types.
pub struct DocumentRegistry {
    settings: SyncSettings,
    autosync: AtomicBool,
    sink: Arc<dyn IndexSink>,
    /// Model name to the document types indexing it.
    models: BTreeMap<String, Vec<Arc<DocumentType>>>,
    /// Related model name to the models whose documents embed it.
    related_models: BTreeMap<String, BTreeSet<String>>,
    indices: Vec<IndexEntry>,
    events: broadcast::Sender<IndexEvent>,
}

impl DocumentRegistry {
    /// An empty registry writing to `sink`.
    pub fn new(settings: SyncSettings, sink: Arc<dyn IndexSink>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            autosync: AtomicBool::new(settings.autosync),
            settings,
            sink,
            models: BTreeMap::new(),
            related_models: BTreeMap::new(),
            indices: Vec::new(),
            events,
        }
    }

    /// Process-wide settings.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// The sink documents write to.
    pub fn sink(&self) -> &Arc<dyn IndexSink> {
        &self.sink
    }

    /// Whether store events are propagated at all.
    pub fn autosync(&self) -> bool {
        self.autosync.load(Ordering::SeqCst)
    }

    /// Turns auto-sync on or off at runtime.
    pub fn set_autosync(&self, enabled: bool) {
        self.autosync.store(enabled, Ordering::SeqCst);
    }

    /// Subscribes to post-index notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// Validates a declaration and registers the resulting document type.
    ///
    /// On error the registry is left unchanged.
    pub fn register_document(
        &mut self,
        definition: DocumentDefinition,
    ) -> Result<Arc<DocumentType>, RegistryError> {
        let doc_type = Arc::new(definition.build(&self.settings)?);
        self.register(doc_type.index().clone(), Arc::clone(&doc_type));
        info!(
            document = %doc_type.name(),
            model = %doc_type.model_name(),
            index = %doc_type.index().name(),
            related_models = ?doc_type.related_models(),
            "Registered document"
        );
        Ok(doc_type)
    }

    /// Binds a document type to a model and to an index.
    ///
    /// Indices are identified by name: registering a second document under
    /// an existing index name adds it to that index. A document registered
    /// under a name that is already taken replaces the previous one.
    pub fn register(&mut self, index: IndexDefinition, doc_type: Arc<DocumentType>) {
        self.unregister(doc_type.name());

        self.models
            .entry(doc_type.model_name().to_string())
            .or_default()
            .push(Arc::clone(&doc_type));

        for related in doc_type.related_models() {
            self.related_models
                .entry(related.clone())
                .or_default()
                .insert(doc_type.model_name().to_string());
        }

        match self.indices.iter_mut().find(|entry| entry.name() == index.name()) {
            Some(entry) => entry.documents.push(doc_type),
            None => self.indices.push(IndexEntry {
                index,
                documents: vec![doc_type],
            }),
        }
    }

    fn unregister(&mut self, name: &str) {
        let mut replaced = false;
        for documents in self.models.values_mut() {
            let before = documents.len();
            documents.retain(|d| d.name() != name);
            replaced |= documents.len() != before;
        }
        if !replaced {
            return;
        }

        debug!(document = %name, "Replacing registered document");
        self.models.retain(|_, documents| !documents.is_empty());
        for entry in &mut self.indices {
            entry.documents.retain(|d| d.name() != name);
        }
        self.indices.retain(|entry| !entry.documents.is_empty());

        self.related_models.clear();
        for doc_type in self.models.values().flatten() {
            for related in doc_type.related_models() {
                self.related_models
                    .entry(related.clone())
                    .or_default()
                    .insert(doc_type.model_name().to_string());
            }
        }
    }

    /// Looks up a document type by name.
    pub fn document_type(&self, name: &str) -> Option<&Arc<DocumentType>> {
        self.models.values().flatten().find(|d| d.name() == name)
    }

    /// Looks up a document type by name, failing when it is not registered.
    pub fn get_document(&self, name: &str) -> Result<&Arc<DocumentType>, RegistryError> {
        self.document_type(name)
            .ok_or_else(|| RegistryError::UnknownDocument {
                name: name.to_string(),
            })
    }

    /// A synchronizer for `doc_type` wired to this registry's sink.
    pub fn document(&self, doc_type: &Arc<DocumentType>) -> Document {
        Document::new(Arc::clone(doc_type), Arc::clone(&self.sink))
            .with_parallel_options(self.settings.parallel_options())
            .with_events(self.events.clone())
    }

    /// Document types in which records of `model` are embedded.
    pub fn related_documents<'a>(
        &'a self,
        model: &'a str,
    ) -> impl Iterator<Item = &'a Arc<DocumentType>> + 'a {
        self.related_models
            .get(model)
            .into_iter()
            .flatten()
            .filter_map(move |owner| self.models.get(owner))
            .flatten()
            .filter(move |doc_type| doc_type.is_related_to(model))
    }

    /// Document types bound to `model` that listen to store events.
    fn listening_documents<'a>(
        &'a self,
        model: &str,
    ) -> impl Iterator<Item = &'a Arc<DocumentType>> + 'a {
        self.models
            .get(model)
            .into_iter()
            .flatten()
            .filter(|doc_type| !doc_type.ignore_signals())
    }

    /// Indexes `instance` in every document bound to its model.
    pub async fn update(
        &self,
        instance: &RecordRef,
        options: &UpdateOptions,
    ) -> SyncResult<BulkReport> {
        let mut report = BulkReport::default();
        if !self.autosync() {
            return Ok(report);
        }

        for doc_type in self.listening_documents(instance.model_name()) {
            report.merge(self.document(doc_type).update_one(instance, options).await?);
        }
        Ok(report)
    }

    /// Removes `instance` from every document bound to its model.
    pub async fn delete(
        &self,
        instance: &RecordRef,
        options: &UpdateOptions,
    ) -> SyncResult<BulkReport> {
        self.update(instance, &options.with_action(BulkAction::Delete))
            .await
    }

    /// Re-indexes the records whose documents embed `instance`.
    pub async fn update_related(
        &self,
        instance: &RecordRef,
        options: &UpdateOptions,
    ) -> SyncResult<BulkReport> {
        let mut report = BulkReport::default();
        if !self.autosync() {
            return Ok(report);
        }

        for doc_type in self.related_documents(instance.model_name()) {
            if let Some(records) = related_records(doc_type, instance).await? {
                report.merge(self.document(doc_type).update(&records, options).await?);
            }
        }
        Ok(report)
    }

    /// Re-indexes the records whose documents embed `instance`, as if
    /// `instance` were already gone.
    pub async fn delete_related(
        &self,
        instance: &RecordRef,
        options: &UpdateOptions,
    ) -> SyncResult<BulkReport> {
        let mut report = BulkReport::default();
        if !self.autosync() {
            return Ok(report);
        }

        for doc_type in self.related_documents(instance.model_name()) {
            if let Some(records) = related_records(doc_type, instance).await? {
                let document = self.document(doc_type).ignoring(Arc::clone(instance));
                report.merge(document.update(&records, options).await?);
            }
        }
        Ok(report)
    }

    /// The operations [`delete_related`](Self::delete_related) would submit,
    /// grouped by document type.
    pub async fn delete_related_operations(
        &self,
        instance: &RecordRef,
    ) -> SyncResult<Vec<(Arc<DocumentType>, Vec<BulkOperation>)>> {
        let mut grouped = Vec::new();
        for doc_type in self.related_documents(instance.model_name()) {
            if let Some(records) = related_records(doc_type, instance).await? {
                let document = self.document(doc_type).ignoring(Arc::clone(instance));
                let operations = document.operations(&records, BulkAction::Index)?;
                if !operations.is_empty() {
                    grouped.push((Arc::clone(doc_type), operations));
                }
            }
        }
        Ok(grouped)
    }

    /// The operations [`delete`](Self::delete) would submit, grouped by
    /// document type.
    pub fn delete_operations(
        &self,
        instance: &RecordRef,
    ) -> SyncResult<Vec<(Arc<DocumentType>, Vec<BulkOperation>)>> {
        let mut grouped = Vec::new();
        for doc_type in self.listening_documents(instance.model_name()) {
            let operations = self
                .document(doc_type)
                .operations(std::slice::from_ref(instance), BulkAction::Delete)?;
            if !operations.is_empty() {
                grouped.push((Arc::clone(doc_type), operations));
            }
        }
        Ok(grouped)
    }

    /// Document types, optionally restricted to the given models.
    pub fn get_documents(&self, models: Option<&[String]>) -> Vec<Arc<DocumentType>> {
        self.models
            .iter()
            .filter(|(model, _)| models.is_none_or(|wanted| wanted.contains(model)))
            .flat_map(|(_, documents)| documents.iter().cloned())
            .collect()
    }

    /// Names of every model backing at least one document.
    pub fn get_models(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    /// Indices, optionally restricted to those storing the given models.
    pub fn get_indices(&self, models: Option<&[String]>) -> Vec<&IndexEntry> {
        self.indices
            .iter()
            .filter(|entry| match models {
                None => true,
                Some(wanted) => entry
                    .documents
                    .iter()
                    .any(|d| wanted.iter().any(|m| m == d.model_name())),
            })
            .collect()
    }

    /// Whether `model` backs a document or is related to one.
    pub fn contains(&self, model: &str) -> bool {
        self.is_indexed(model) || self.is_related_model(model)
    }

    /// Whether `model` backs at least one document.
    pub fn is_indexed(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Whether some document embeds records of `model`.
    pub fn is_related_model(&self, model: &str) -> bool {
        self.related_models.contains_key(model)
    }
}

/// Records of `doc_type`'s model affected by a change to `instance`.
async fn related_records(
    doc_type: &DocumentType,
    instance: &RecordRef,
) -> SyncResult<Option<Vec<RecordRef>>> {
    match doc_type.hooks().instances_from_related(instance).await {
        Ok(records) => Ok(records),
        Err(HookError::RecordMissing { model, key }) => {
            debug!(
                document = %doc_type.name(),
                related = %key_text(&instance.primary_key()),
                missing_model = %model,
                missing_key = %key,
                "Related record vanished, skipping"
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRegistry")
            .field("models", &self.get_models())
            .field("related_models", &self.related_models)
            .field(
                "indices",
                &self.indices.iter().map(IndexEntry::name).collect::<Vec<_>>(),
            )
            .field("autosync", &self.autosync())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Field, ModelFieldKind, ModelSchema};
    use crate::sink::MemorySink;

    fn registry() -> DocumentRegistry {
        DocumentRegistry::new(SyncSettings::default(), Arc::new(MemorySink::new()))
    }

    fn car_document(name: &str, index: &str) -> DocumentDefinition {
        DocumentType::declare(name)
            .model(ModelSchema::new("Car").field("name", ModelFieldKind::Char))
            .index(IndexDefinition::new(index))
            .model_fields(["name"])
            .related_models(["Manufacturer"])
    }

    fn ad_document() -> DocumentDefinition {
        DocumentType::declare("AdDocument")
            .model(ModelSchema::new("Ad").field("title", ModelFieldKind::Char))
            .index(IndexDefinition::new("ads"))
            .field("url", Field::keyword())
            .model_fields(["title"])
            .related_models(["Car"])
    }

    #[test]
    fn test_register_document() {
        let mut registry = registry();
        registry.register_document(car_document("CarDocument", "cars")).unwrap();
        registry.register_document(ad_document()).unwrap();

        assert_eq!(registry.get_models(), vec!["Ad", "Car"]);
        assert!(registry.is_indexed("Car"));
        assert!(!registry.is_indexed("Manufacturer"));
        assert!(registry.contains("Manufacturer"));
        assert!(!registry.contains("Part"));

        let related: Vec<&str> = registry.related_documents("Car").map(|d| d.name()).collect();
        assert_eq!(related, vec!["AdDocument"]);
    }

    #[test]
    fn test_indices_merge_by_name() {
        let mut registry = registry();
        registry.register_document(car_document("CarDocument", "vehicles")).unwrap();
        registry.register_document(car_document("CarSummaryDocument", "vehicles")).unwrap();

        let indices = registry.get_indices(None);
        assert_eq!(indices.len(), 1);
        assert_eq!(indices[0].documents().len(), 2);
        assert_eq!(registry.get_documents(Some(&["Car".to_string()])).len(), 2);
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = registry();
        registry.register_document(car_document("CarDocument", "cars")).unwrap();
        registry.register_document(car_document("CarDocument", "cars_v2")).unwrap();

        assert_eq!(registry.get_documents(None).len(), 1);
        let names: Vec<&str> = registry.get_indices(None).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["cars_v2"]);
    }

    #[test]
    fn test_failed_registration_leaves_registry_unchanged() {
        let mut registry = registry();
        let result = registry.register_document(
            car_document("CarDocument", "cars").model_fields(["wheels"]),
        );
        assert!(result.is_err());
        assert!(registry.get_models().is_empty());
        assert!(registry.get_indices(None).is_empty());
    }

    #[test]
    fn test_get_indices_filtered_by_model() {
        let mut registry = registry();
        registry.register_document(car_document("CarDocument", "cars")).unwrap();
        registry.register_document(ad_document()).unwrap();

        let indices = registry.get_indices(Some(&["Ad".to_string()]));
        assert_eq!(indices.len(), 1);
        assert_eq!(indices[0].name(), "ads");
        assert_eq!(
            indices[0].body()["mappings"]["properties"]["url"],
            serde_json::json!({"type": "keyword"})
        );
    }

    #[test]
    fn test_document_type_lookup() {
        let mut registry = registry();
        registry.register_document(ad_document()).unwrap();
        assert!(registry.document_type("AdDocument").is_some());
        assert!(registry.document_type("CarDocument").is_none());
        assert!(matches!(
            registry.get_document("CarDocument"),
            Err(RegistryError::UnknownDocument { name }) if name == "CarDocument"
        ));
    }
}
