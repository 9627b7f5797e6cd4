//! Search-engine index definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};

/// A named index and its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    name: String,
    #[serde(default)]
    settings: Map<String, Json>,
}

impl IndexDefinition {
    /// An index named `name` with no settings of its own.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Map::new(),
        }
    }

    /// Sets a single index setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: Json) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// The name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings sent when the index is created.
    pub fn settings(&self) -> &Map<String, Json> {
        &self.settings
    }

    /// Applies process-wide defaults underneath this index's own settings.
    pub fn with_defaults(mut self, defaults: &Map<String, Json>) -> Self {
        let mut merged = defaults.clone();
        merged.extend(std::mem::take(&mut self.settings));
        self.settings = merged;
        self
    }

    /// The create-index request body for the given mapping properties.
    pub fn body(&self, properties: Map<String, Json>) -> Json {
        json!({
            "settings": self.settings,
            "mappings": { "properties": properties },
        })
    }
}
