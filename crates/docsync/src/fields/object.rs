use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as Json, json};

use super::{Field, PrepareFn, extract};
use crate::error::LookupError;
use crate::record::Value;

/// A reusable sub-document schema with its own prepare overrides.
#[derive(Clone)]
pub struct InnerDoc {
    name: String,
    fields: Vec<(String, Field)>,
    prepare: HashMap<String, PrepareFn>,
}

impl InnerDoc {
    /// An empty schema named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            prepare: HashMap::new(),
        }
    }

    /// Adds a sub-field. Its path defaults to `name`.
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        let name = name.into();
        let field = field.with_default_path(&name);
        self.fields.push((name, field));
        self
    }

    /// Overrides how the sub-field `name` is computed from the sub-object.
    pub fn prepare<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Json + Send + Sync + 'static,
    {
        self.prepare.insert(name.into(), Arc::new(f));
        self
    }

    /// The name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared sub-fields, in declaration order.
    pub fn fields(&self) -> &[(String, Field)] {
        &self.fields
    }
}

impl fmt::Debug for InnerDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerDoc")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("prepare", &self.prepare.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Sub-fields of an object field.
#[derive(Debug, Clone)]
pub enum ObjectSchema {
    /// Inline sub-fields.
    Properties(Vec<(String, Field)>),
    /// An external schema.
    Inner(Arc<InnerDoc>),
}

impl ObjectSchema {
    /// Inline sub-fields. Each sub-field's path defaults to its name.
    pub fn properties<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Field)>,
    {
        ObjectSchema::Properties(
            fields
                .into_iter()
                .map(|(name, field)| {
                    let name = name.into();
                    let field = field.with_default_path(&name);
                    (name, field)
                })
                .collect(),
        )
    }

    /// An object with no declared sub-fields. Plain mappings pass through.
    pub fn dynamic() -> Self {
        ObjectSchema::Properties(Vec::new())
    }

    /// Sub-fields from a reusable inner document.
    pub fn inner(doc: InnerDoc) -> Self {
        ObjectSchema::Inner(Arc::new(doc))
    }

    fn fields(&self) -> &[(String, Field)] {
        match self {
            ObjectSchema::Properties(fields) => fields,
            ObjectSchema::Inner(doc) => &doc.fields,
        }
    }

    fn prepare_for(&self, name: &str) -> Option<&PrepareFn> {
        match self {
            ObjectSchema::Properties(_) => None,
            ObjectSchema::Inner(doc) => doc.prepare.get(name),
        }
    }
}

/// An object or nested field.
#[derive(Debug, Clone)]
pub struct ObjectField {
    schema: ObjectSchema,
    nested: bool,
    path: Option<Vec<String>>,
    required: bool,
}

impl ObjectField {
    pub(super) fn new(schema: ObjectSchema, nested: bool) -> Self {
        Self {
            schema,
            nested,
            path: None,
            required: false,
        }
    }

    pub(super) fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = Some(path);
        self
    }

    pub(super) fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub(super) fn path(&self) -> Option<&[String]> {
        self.path.as_deref()
    }

    /// Whether the field maps as `nested` rather than `object`.
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// The sub-field schema.
    pub fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    pub(super) fn resolve(&self, value: &Value, ignore: Option<&Value>) -> Result<Json, LookupError> {
        let path = self.path.as_deref().unwrap_or_default();
        match extract::resolve(value, path, self.required, ignore)? {
            Value::Null => Ok(Json::Object(Map::new())),
            Value::List(items) => items
                .iter()
                .filter(|item| !ignore.is_some_and(|sentinel| item.same_as(sentinel)))
                .map(|item| self.inner_data(item, ignore))
                .collect::<Result<Vec<_>, _>>()
                .map(Json::Array),
            object => self.inner_data(&object, ignore),
        }
    }

    fn inner_data(&self, object: &Value, ignore: Option<&Value>) -> Result<Json, LookupError> {
        let mut data = Map::new();
        for (name, field) in self.schema.fields() {
            if let Some(prepare) = self.schema.prepare_for(name) {
                data.insert(name.clone(), prepare(object));
            } else if field.is_extractable() {
                data.insert(name.clone(), field.resolve(object, ignore)?);
            }
        }

        if data.is_empty() && matches!(object, Value::Map(_)) {
            return Ok(object.to_json());
        }
        Ok(Json::Object(data))
    }

    pub(super) fn mapping(&self) -> Json {
        let properties: Map<String, Json> = self
            .schema
            .fields()
            .iter()
            .map(|(name, field)| (name.clone(), field.mapping()))
            .collect();
        json!({
            "type": if self.nested { "nested" } else { "object" },
            "properties": properties,
        })
    }
}
