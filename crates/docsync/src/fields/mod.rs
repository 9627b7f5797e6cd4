//! Index field definitions.
//!
//! A [`Field`] knows two things: the engine mapping it declares, and how to
//! turn a record (or sub-object) into its indexable JSON value. Scalar and
//! object fields carry an immutable attribute path that defaults to the
//! field's own name; the path is fixed when the field is attached to a
//! document or an object schema.
//!
//! # Example
//!
//! ```rust
//! use helios_docsync::fields::{Field, ObjectSchema};
//!
//! let manufacturer = Field::object(ObjectSchema::properties([
//!     ("name", Field::text()),
//!     ("country", Field::keyword().attr("country.code")),
//! ]));
//! let tags = Field::list(Field::keyword());
//! assert_eq!(tags.mapping()["type"], "keyword");
//! assert_eq!(manufacturer.mapping()["type"], "object");
//! ```

pub mod extract;
pub mod model;
mod object;

pub use model::{ModelFieldKind, ModelSchema};
pub use object::{InnerDoc, ObjectField, ObjectSchema};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};

use crate::error::LookupError;
use crate::record::{Value, format_time};

/// A per-field value override. Receives the record (or sub-object) being
/// prepared and returns the indexable value.
pub type PrepareFn = Arc<dyn Fn(&Value) -> Json + Send + Sync>;

/// Engine types of scalar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
// Variants are the engine mapping types
#[allow(missing_docs)]
pub enum FieldType {
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    ScaledFloat,
    Text,
    Keyword,
    SearchAsYouType,
    /// A file attachment, indexed as the file URL.
    File,
    Date,
    /// A time of day, indexed as an ISO string keyword.
    Time,
    GeoPoint,
    GeoShape,
    Completion,
    Ip,
}

impl FieldType {
    /// The `type` declared in the engine mapping.
    pub fn engine_type(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Byte => "byte",
            FieldType::Short => "short",
            FieldType::Integer => "integer",
            FieldType::Long => "long",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::ScaledFloat => "scaled_float",
            FieldType::Text | FieldType::File => "text",
            FieldType::Keyword | FieldType::Time => "keyword",
            FieldType::SearchAsYouType => "search_as_you_type",
            FieldType::Date => "date",
            FieldType::GeoPoint => "geo_point",
            FieldType::GeoShape => "geo_shape",
            FieldType::Completion => "completion",
            FieldType::Ip => "ip",
        }
    }
}

/// A leaf field resolved through an attribute path.
#[derive(Debug, Clone)]
pub struct ScalarField {
    /// Engine type of the field.
    pub field_type: FieldType,
    path: Option<Vec<String>>,
    required: bool,
    options: Map<String, Json>,
}

impl ScalarField {
    fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            path: None,
            required: false,
            options: Map::new(),
        }
    }

    fn resolve(&self, value: &Value, ignore: Option<&Value>) -> Result<Json, LookupError> {
        let path = self.path.as_deref().unwrap_or_default();
        let resolved = extract::resolve(value, path, self.required, ignore)?;
        Ok(match self.field_type {
            FieldType::File => match resolved {
                Value::File(Some(url)) | Value::Str(url) => Json::String(url),
                Value::Null | Value::File(None) => Json::String(String::new()),
                other => other.to_json(),
            },
            FieldType::Time => match resolved {
                Value::Time(t) => Json::String(format_time(&t)),
                Value::DateTime(dt) => Json::String(format_time(&dt.time())),
                other if other.is_falsy() => Json::Null,
                other => other.to_json(),
            },
            _ => resolved.to_json(),
        })
    }

    fn mapping(&self) -> Json {
        let mut mapping = Map::new();
        mapping.insert("type".to_string(), json!(self.field_type.engine_type()));
        for (key, value) in &self.options {
            mapping.insert(key.clone(), value.clone());
        }
        Json::Object(mapping)
    }
}

/// Wraps another field so its value is always an array.
#[derive(Debug, Clone)]
pub struct ListField {
    inner: Box<Field>,
}

impl ListField {
    /// The wrapped field.
    pub fn inner(&self) -> &Field {
        &self.inner
    }
}

/// A field that only contributes to the engine mapping.
///
/// Raw fields are never extracted from records; documents populate them
/// through a prepare override if at all.
#[derive(Debug, Clone)]
pub struct RawField {
    mapping: Json,
}

/// An index field.
#[derive(Debug, Clone)]
pub enum Field {
    /// A leaf value.
    Scalar(ScalarField),
    /// An embedded object or nested collection.
    Object(ObjectField),
    /// A field whose value is always an array.
    List(ListField),
    /// A mapping-only field.
    Raw(RawField),
}

impl Field {
    /// A scalar field of the given engine type.
    pub fn scalar(field_type: FieldType) -> Self {
        Field::Scalar(ScalarField::new(field_type))
    }

    /// A `text` field.
    pub fn text() -> Self {
        Self::scalar(FieldType::Text)
    }

    /// A `keyword` field.
    pub fn keyword() -> Self {
        Self::scalar(FieldType::Keyword)
    }

    /// An `integer` field.
    pub fn integer() -> Self {
        Self::scalar(FieldType::Integer)
    }

    /// A `long` field.
    pub fn long() -> Self {
        Self::scalar(FieldType::Long)
    }

    /// A `float` field.
    pub fn float() -> Self {
        Self::scalar(FieldType::Float)
    }

    /// A `double` field.
    pub fn double() -> Self {
        Self::scalar(FieldType::Double)
    }

    /// A `boolean` field.
    pub fn boolean() -> Self {
        Self::scalar(FieldType::Boolean)
    }

    /// A `date` field.
    pub fn date() -> Self {
        Self::scalar(FieldType::Date)
    }

    /// A time field, mapped as `keyword`.
    pub fn time() -> Self {
        Self::scalar(FieldType::Time)
    }

    /// A file field, indexed as the file URL.
    pub fn file() -> Self {
        Self::scalar(FieldType::File)
    }

    /// An object field.
    pub fn object(schema: ObjectSchema) -> Self {
        Field::Object(ObjectField::new(schema, false))
    }

    /// A nested field: an object field mapped with `"type": "nested"`.
    pub fn nested(schema: ObjectSchema) -> Self {
        Field::Object(ObjectField::new(schema, true))
    }

    /// A list wrapper around `inner`.
    pub fn list(inner: Field) -> Self {
        Field::List(ListField {
            inner: Box::new(inner),
        })
    }

    /// A mapping-only field with an arbitrary engine mapping.
    pub fn raw(mapping: Json) -> Self {
        Field::Raw(RawField { mapping })
    }

    /// Sets an explicit dotted attribute path.
    pub fn attr(self, path: &str) -> Self {
        self.with_path(extract::split_path(path))
    }

    /// Marks the field as required: an unresolvable path is an error
    /// instead of null.
    pub fn required(self) -> Self {
        match self {
            Field::Scalar(mut f) => {
                f.required = true;
                Field::Scalar(f)
            }
            Field::Object(f) => Field::Object(f.required()),
            Field::List(mut f) => {
                f.inner = Box::new(f.inner.required());
                Field::List(f)
            }
            raw => raw,
        }
    }

    /// Adds a mapping option such as `analyzer` or `format`.
    pub fn option(self, key: &str, value: Json) -> Self {
        match self {
            Field::Scalar(mut f) => {
                f.options.insert(key.to_string(), value);
                Field::Scalar(f)
            }
            Field::List(mut f) => {
                f.inner = Box::new(f.inner.option(key, value));
                Field::List(f)
            }
            Field::Raw(mut f) => {
                if let Json::Object(map) = &mut f.mapping {
                    map.insert(key.to_string(), value);
                }
                Field::Raw(f)
            }
            object => object,
        }
    }

    fn with_path(self, path: Vec<String>) -> Self {
        match self {
            Field::Scalar(mut f) => {
                f.path = Some(path);
                Field::Scalar(f)
            }
            Field::Object(f) => Field::Object(f.with_path(path)),
            Field::List(mut f) => {
                f.inner = Box::new(f.inner.with_path(path));
                Field::List(f)
            }
            raw => raw,
        }
    }

    /// Sets the path to `[name]` unless an explicit path was given.
    pub(crate) fn with_default_path(self, name: &str) -> Self {
        if self.path().is_some() {
            self
        } else {
            self.with_path(vec![name.to_string()])
        }
    }

    /// The attribute path, if one has been fixed.
    pub fn path(&self) -> Option<&[String]> {
        match self {
            Field::Scalar(f) => f.path.as_deref(),
            Field::Object(f) => f.path(),
            Field::List(f) => f.inner.path(),
            Field::Raw(_) => None,
        }
    }

    /// Whether values for this field are extracted from records.
    pub fn is_extractable(&self) -> bool {
        match self {
            Field::Raw(_) => false,
            Field::List(f) => f.inner.is_extractable(),
            _ => true,
        }
    }

    /// Resolves the indexable value of this field for `value`.
    pub fn resolve(&self, value: &Value, ignore: Option<&Value>) -> Result<Json, LookupError> {
        match self {
            Field::Scalar(f) => f.resolve(value, ignore),
            Field::Object(f) => f.resolve(value, ignore),
            Field::List(f) => {
                let resolved = f.inner.resolve(value, ignore)?;
                Ok(match resolved {
                    Json::Array(items) => Json::Array(items),
                    other if is_falsy_json(&other) => Json::Array(Vec::new()),
                    other => Json::Array(vec![other]),
                })
            }
            Field::Raw(_) => Ok(Json::Null),
        }
    }

    /// The engine mapping of this field.
    pub fn mapping(&self) -> Json {
        match self {
            Field::Scalar(f) => f.mapping(),
            Field::Object(f) => f.mapping(),
            Field::List(f) => f.inner.mapping(),
            Field::Raw(f) => f.mapping.clone(),
        }
    }
}

pub(crate) fn is_falsy_json(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::Bool(b) => !b,
        Json::Number(n) => n.as_f64() == Some(0.0),
        Json::String(s) => s.is_empty(),
        Json::Array(items) => items.is_empty(),
        Json::Object(map) => map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DynamicRecord;
    use chrono::NaiveTime;

    fn record() -> Value {
        Value::Record(
            DynamicRecord::new("Car", 1)
                .with("name", "Prius")
                .with("price", 24000.5)
                .with("manual", Value::File(Some("/media/prius.pdf".to_string())))
                .with("brochure", Value::File(None))
                .with("opens_at", NaiveTime::from_hms_opt(8, 15, 0).unwrap())
                .with("tags", vec!["hybrid"])
                .with("color", "red")
                .with("doors", 0)
                .into_ref(),
        )
    }

    #[test]
    fn test_scalar_resolve_uses_default_path() {
        let field = Field::text().with_default_path("name");
        assert_eq!(field.resolve(&record(), None).unwrap(), json!("Prius"));
    }

    #[test]
    fn test_explicit_path_wins_over_default() {
        let field = Field::text().attr("color").with_default_path("name");
        assert_eq!(field.resolve(&record(), None).unwrap(), json!("red"));
    }

    #[test]
    fn test_file_field() {
        let manual = Field::file().with_default_path("manual");
        let brochure = Field::file().with_default_path("brochure");
        let missing = Field::file().with_default_path("video");
        assert_eq!(manual.resolve(&record(), None).unwrap(), json!("/media/prius.pdf"));
        assert_eq!(brochure.resolve(&record(), None).unwrap(), json!(""));
        assert_eq!(missing.resolve(&record(), None).unwrap(), json!(""));
    }

    #[test]
    fn test_time_field() {
        let field = Field::time().with_default_path("opens_at");
        assert_eq!(field.resolve(&record(), None).unwrap(), json!("08:15:00"));
        assert_eq!(field.mapping(), json!({"type": "keyword"}));
    }

    #[test]
    fn test_list_wrapper() {
        let tags = Field::list(Field::keyword()).with_default_path("tags");
        let color = Field::list(Field::keyword()).with_default_path("color");
        let doors = Field::list(Field::integer()).with_default_path("doors");
        let missing = Field::list(Field::keyword()).with_default_path("wheels");

        assert_eq!(tags.resolve(&record(), None).unwrap(), json!(["hybrid"]));
        assert_eq!(color.resolve(&record(), None).unwrap(), json!(["red"]));
        assert_eq!(doors.resolve(&record(), None).unwrap(), json!([]));
        assert_eq!(missing.resolve(&record(), None).unwrap(), json!([]));
    }

    #[test]
    fn test_list_mapping_is_inner_mapping() {
        let field = Field::list(Field::keyword().option("normalizer", json!("lowercase")));
        assert_eq!(
            field.mapping(),
            json!({"type": "keyword", "normalizer": "lowercase"})
        );
    }

    #[test]
    fn test_required_propagates() {
        let field = Field::text().required().with_default_path("missing");
        assert!(field.resolve(&record(), None).is_err());
    }

    #[test]
    fn test_raw_field() {
        let field = Field::raw(json!({"type": "geo_point"}));
        assert!(!field.is_extractable());
        assert!(field.path().is_none());
        assert_eq!(field.mapping(), json!({"type": "geo_point"}));
    }

    #[test]
    fn test_engine_types() {
        assert_eq!(FieldType::ScaledFloat.engine_type(), "scaled_float");
        assert_eq!(FieldType::File.engine_type(), "text");
        assert_eq!(FieldType::SearchAsYouType.engine_type(), "search_as_you_type");
    }
}
