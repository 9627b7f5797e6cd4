//! Shared fixtures for integration tests.
//!
//! The fixture domain is a small car catalogue: manufacturers build cars,
//! and cars carry ads. `CarDocument` indexes cars and embeds the
//! manufacturer and the ads, so both are related models.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use helios_docsync::error::{HookError, QueueError};
use helios_docsync::fields::{ModelFieldKind, ModelSchema, ObjectSchema};
use helios_docsync::record::Lookup;
use helios_docsync::signals::{SyncJob, TaskQueue};
use helios_docsync::{
    DocumentHooks, DocumentRegistry, DocumentType, DynamicRecord, Field, IndexDefinition,
    MemorySink, MemoryStore, RecordRef, RecordStore, SyncSettings, Value,
};
use parking_lot::Mutex;
use serde_json::json;

pub fn manufacturer(id: i64, name: &str) -> RecordRef {
    DynamicRecord::new("Manufacturer", id)
        .with("name", name)
        .with("country", "FR")
        .into_ref()
}

pub fn ad(id: i64, title: &str, car: Option<RecordRef>) -> RecordRef {
    let mut ad = DynamicRecord::new("Ad", id).with("title", title);
    if let Some(car) = car {
        ad.set("car", car);
    }
    ad.into_ref()
}

/// A car with the given ads attached.
pub fn car(id: i64, name: &str, price: f64, maker: &RecordRef, ads: &[(i64, &str)]) -> RecordRef {
    let ads: Vec<RecordRef> = ads.iter().map(|(id, title)| ad(*id, title, None)).collect();
    DynamicRecord::new("Car", id)
        .with("name", name)
        .with("price", price)
        .with("manufacturer", Arc::clone(maker))
        .with("ads", Value::related(ads))
        .into_ref()
}

pub fn car_model() -> ModelSchema {
    ModelSchema::new("Car")
        .field("name", ModelFieldKind::Char)
        .field("price", ModelFieldKind::Float)
        .field("launched", ModelFieldKind::Date)
        .field("manufacturer", ModelFieldKind::ForeignKey)
}

/// Hooks mapping a manufacturer or an ad back to the affected cars.
pub struct CarHooks {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl DocumentHooks for CarHooks {
    async fn instances_from_related(
        &self,
        related: &RecordRef,
    ) -> Result<Option<Vec<RecordRef>>, HookError> {
        match related.model_name() {
            "Manufacturer" => {
                let cars = self
                    .store
                    .fetch_page("Car", 0, usize::MAX)
                    .await
                    .map_err(|e| HookError::Failed {
                        message: e.to_string(),
                    })?;
                let key = related.primary_key();
                Ok(Some(
                    cars.into_iter()
                        .filter(|car| {
                            matches!(
                                car.attribute("manufacturer"),
                                Lookup::Found(Value::Record(maker)) if maker.primary_key() == key
                            )
                        })
                        .collect(),
                ))
            }
            "Ad" => match related.attribute("car") {
                Lookup::Found(Value::Record(car)) => Ok(Some(vec![car])),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

/// The car document: `name` and `price` come from the model, `color` is
/// computed, and manufacturer and ads are embedded.
pub fn car_document(store: Arc<MemoryStore>) -> helios_docsync::document::DocumentDefinition {
    DocumentType::declare("CarDocument")
        .model(car_model())
        .index(IndexDefinition::new("cars").with_setting("number_of_shards", json!(1)))
        .field("color", Field::text())
        .field(
            "manufacturer",
            Field::object(ObjectSchema::properties([
                ("name", Field::text()),
                ("country", Field::keyword()),
            ])),
        )
        .field(
            "ads",
            Field::nested(ObjectSchema::properties([("title", Field::text())])),
        )
        .model_fields(["name", "price"])
        .prepare("color", |_| json!("blue"))
        .related_models(["Manufacturer", "Ad"])
        .hooks(CarHooks { store })
}

pub fn manufacturer_document() -> helios_docsync::document::DocumentDefinition {
    DocumentType::declare("ManufacturerDocument")
        .model(
            ModelSchema::new("Manufacturer")
                .field("name", ModelFieldKind::Char)
                .field("country", ModelFieldKind::Char),
        )
        .index(IndexDefinition::new("manufacturers"))
        .model_fields(["name", "country"])
}

/// Everything a test needs, wired together.
pub struct Fixture {
    pub sink: Arc<MemorySink>,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<DocumentRegistry>,
}

pub fn fixture(settings: SyncSettings) -> Fixture {
    let sink = Arc::new(MemorySink::new());
    let store = Arc::new(MemoryStore::new());
    let mut registry = DocumentRegistry::new(settings, sink.clone());
    registry
        .register_document(car_document(Arc::clone(&store)))
        .unwrap();
    registry
        .register_document(manufacturer_document())
        .unwrap();
    Fixture {
        sink,
        store,
        registry: Arc::new(registry),
    }
}

/// A task queue that only records what was enqueued.
#[derive(Default)]
pub struct RecordingQueue {
    pub jobs: Mutex<Vec<SyncJob>>,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<SyncJob> {
        self.jobs.lock().clone()
    }

    pub fn take(&self) -> Vec<SyncJob> {
        std::mem::take(&mut *self.jobs.lock())
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, job: SyncJob) -> Result<(), QueueError> {
        self.jobs.lock().push(job);
        Ok(())
    }
}
