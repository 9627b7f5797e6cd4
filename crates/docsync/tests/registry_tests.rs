//! Registry-level propagation: related documents, auto-sync, registration.

mod common;

use std::sync::Arc;

use helios_docsync::error::RegistryError;
use helios_docsync::fields::{ModelFieldKind, ModelSchema};
use helios_docsync::{
    DocumentRegistry, DocumentType, Field, IndexDefinition, MemorySink, MemoryStore, SyncSettings,
    UpdateOptions,
};
use serde_json::json;

use common::{CarHooks, ad, car, car_document, car_model, fixture, manufacturer};

#[tokio::test]
async fn test_update_related_reindexes_embedding_records() {
    let fixture = fixture(SyncSettings::default());
    let maker = manufacturer(1, "Bugatti");
    let other = manufacturer(2, "Delahaye");
    fixture.store.insert(car(1, "Type 57", 5_400_000.0, &maker, &[]));
    fixture.store.insert(car(2, "Type 41", 9_000_000.0, &maker, &[]));
    fixture.store.insert(car(3, "135", 800_000.0, &other, &[]));

    let report = fixture
        .registry
        .update_related(&maker, &UpdateOptions::index())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert!(fixture.sink.document("cars", &json!(1)).is_some());
    assert!(fixture.sink.document("cars", &json!(2)).is_some());
    assert!(fixture.sink.document("cars", &json!(3)).is_none());
}

#[tokio::test]
async fn test_update_related_skips_documents_not_listing_the_model() {
    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(MemoryStore::new());
    let mut registry = DocumentRegistry::new(SyncSettings::default(), sink.clone());
    registry
        .register_document(car_document(Arc::clone(&store)))
        .unwrap();
    // Same model and hooks, but manufacturers are not embedded.
    registry
        .register_document(
            DocumentType::declare("CarSummaryDocument")
                .model(car_model())
                .index(IndexDefinition::new("car_summaries"))
                .model_fields(["name"])
                .hooks(CarHooks {
                    store: Arc::clone(&store),
                }),
        )
        .unwrap();
    registry
        .register_document(
            DocumentType::declare("PartDocument")
                .model(ModelSchema::new("Part").field("serial", ModelFieldKind::Char))
                .index(IndexDefinition::new("parts"))
                .model_fields(["serial"])
                .related_models(["Ad"])
                .hooks(CarHooks {
                    store: Arc::clone(&store),
                }),
        )
        .unwrap();

    let maker = manufacturer(1, "Bugatti");
    store.insert(car(1, "Type 57", 5_400_000.0, &maker, &[]));

    let related: Vec<&str> = registry
        .related_documents("Manufacturer")
        .map(|d| d.name())
        .collect();
    assert_eq!(related, vec!["CarDocument"]);

    let report = registry
        .update_related(&maker, &UpdateOptions::index())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(sink.count("cars"), 1);
    assert_eq!(sink.count("car_summaries"), 0);
    assert_eq!(sink.count("parts"), 0);
    assert_eq!(sink.bulk_calls().len(), 1);
}

#[tokio::test]
async fn test_update_indexes_own_documents_only() {
    let fixture = fixture(SyncSettings::default());
    let maker = manufacturer(1, "Bugatti");

    fixture
        .registry
        .update(&maker, &UpdateOptions::index())
        .await
        .unwrap();

    assert_eq!(
        fixture.sink.document("manufacturers", &json!(1)).unwrap()["name"],
        json!("Bugatti")
    );
    assert_eq!(fixture.sink.count("cars"), 0);
}

#[tokio::test]
async fn test_delete_related_excludes_deleted_record() {
    let fixture = fixture(SyncSettings::default());
    let maker = manufacturer(1, "Bugatti");
    let owner = car(1, "Type 57", 5_400_000.0, &maker, &[(10, "Mint"), (11, "Barn find")]);
    let doomed = ad(11, "Barn find", Some(Arc::clone(&owner)));

    fixture
        .registry
        .delete_related(&doomed, &UpdateOptions::index())
        .await
        .unwrap();

    let source = fixture.sink.document("cars", &json!(1)).unwrap();
    assert_eq!(source["ads"], json!([{"title": "Mint"}]));
}

#[tokio::test]
async fn test_autosync_disabled_is_noop() {
    let settings = SyncSettings {
        autosync: false,
        ..Default::default()
    };
    let fixture = fixture(settings);
    let maker = manufacturer(1, "Bugatti");

    let report = fixture
        .registry
        .update(&maker, &UpdateOptions::index())
        .await
        .unwrap();
    assert_eq!(report.total(), 0);
    assert!(fixture.sink.calls().is_empty());

    fixture.registry.set_autosync(true);
    fixture
        .registry
        .update(&maker, &UpdateOptions::index())
        .await
        .unwrap();
    assert_eq!(fixture.sink.count("manufacturers"), 1);
}

#[tokio::test]
async fn test_ignore_signals_skips_document() {
    let fixture = fixture(SyncSettings::default());
    let doc_type = fixture.registry.document_type("ManufacturerDocument").unwrap();
    doc_type.set_ignore_signals(true);

    fixture
        .registry
        .update(&manufacturer(1, "Bugatti"), &UpdateOptions::index())
        .await
        .unwrap();

    assert_eq!(fixture.sink.count("manufacturers"), 0);
}

#[tokio::test]
async fn test_subscribers_receive_index_events() {
    let fixture = fixture(SyncSettings::default());
    let mut events = fixture.registry.subscribe();

    fixture
        .registry
        .update(&manufacturer(1, "Bugatti"), &UpdateOptions::index())
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.document, "ManufacturerDocument");
    assert_eq!(event.index, "manufacturers");
    assert_eq!(event.operations, 1);
}

#[test]
fn test_registration_errors() {
    let mut registry = DocumentRegistry::new(SyncSettings::default(), Arc::new(MemorySink::new()));

    let no_model = DocumentType::declare("Orphan").index(IndexDefinition::new("orphans"));
    assert!(matches!(
        registry.register_document(no_model),
        Err(RegistryError::Configuration { .. })
    ));

    let no_index = DocumentType::declare("Unbound").model(car_model());
    assert!(matches!(
        registry.register_document(no_index),
        Err(RegistryError::Configuration { .. })
    ));

    let redeclared = DocumentType::declare("Redeclared")
        .model(car_model())
        .index(IndexDefinition::new("cars"))
        .field("name", Field::keyword())
        .model_fields(["name"]);
    assert!(matches!(
        registry.register_document(redeclared),
        Err(RegistryError::RedeclaredField { field, .. }) if field == "name"
    ));

    let unmapped = DocumentType::declare("Unmapped")
        .model(car_model())
        .index(IndexDefinition::new("cars"))
        .model_fields(["manufacturer"]);
    assert!(matches!(
        registry.register_document(unmapped),
        Err(RegistryError::ModelFieldNotMapped { .. })
    ));

    let unknown = DocumentType::declare("Unknown")
        .model(car_model())
        .index(IndexDefinition::new("cars"))
        .model_fields(["mileage"]);
    assert!(matches!(
        registry.register_document(unknown),
        Err(RegistryError::UnknownModelField { .. })
    ));

    assert!(registry.get_models().is_empty());
}

#[test]
fn test_index_defaults_merge_with_overrides() {
    let mut settings = SyncSettings::default();
    settings
        .index_settings
        .insert("number_of_shards".to_string(), json!(5));
    settings
        .index_settings
        .insert("number_of_replicas".to_string(), json!(2));

    let mut registry = DocumentRegistry::new(settings, Arc::new(MemorySink::new()));
    let store = Arc::new(helios_docsync::MemoryStore::new());
    let doc_type = registry.register_document(car_document(store)).unwrap();

    let index_settings = doc_type.index().settings();
    assert_eq!(index_settings["number_of_shards"], json!(1));
    assert_eq!(index_settings["number_of_replicas"], json!(2));
}

#[test]
fn test_model_field_mapping() {
    let mut registry = DocumentRegistry::new(SyncSettings::default(), Arc::new(MemorySink::new()));
    let doc_type = registry
        .register_document(
            DocumentType::declare("PartDocument")
                .model(
                    ModelSchema::new("Part")
                        .field("serial", ModelFieldKind::Uuid)
                        .field("weight", ModelFieldKind::Decimal)
                        .field("in_stock", ModelFieldKind::Boolean),
                )
                .index(IndexDefinition::new("parts"))
                .model_fields(["serial", "weight", "in_stock"]),
        )
        .unwrap();

    let properties = doc_type.properties();
    assert_eq!(properties["serial"], json!({"type": "keyword"}));
    assert_eq!(properties["weight"], json!({"type": "double"}));
    assert_eq!(properties["in_stock"], json!({"type": "boolean"}));
}
