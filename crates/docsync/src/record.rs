//! Records and the dynamic values read from them.
//!
//! A [`Record`] is one row of a model type in the relational store. The
//! engine never knows the concrete row type; it walks field paths through
//! the three lookup strategies a record exposes and receives [`Value`]s.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Map, Number, Value as Json};

/// Primary key of a record. Integer or string keys are both common.
pub type RecordKey = Json;

/// Shared handle to a record.
pub type RecordRef = Arc<dyn Record>;

/// Outcome of a single lookup strategy.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// The strategy produced a value.
    Found(Value),
    /// The strategy does not apply; the next one is tried.
    NotApplicable,
    /// The lookup referenced a related record that no longer exists.
    DoesNotExist,
}

/// A row of some model type.
///
/// Only `model_name` and `primary_key` are mandatory. The lookup strategies
/// default to [`Lookup::NotApplicable`].
pub trait Record: Send + Sync + fmt::Debug {
    /// Name of the model type this record belongs to.
    fn model_name(&self) -> &str;

    /// Primary key of the record.
    fn primary_key(&self) -> RecordKey;

    /// Named attribute (`record.name`).
    fn attribute(&self, _name: &str) -> Lookup {
        Lookup::NotApplicable
    }

    /// Keyed item (`record["name"]`).
    fn item(&self, _key: &str) -> Lookup {
        Lookup::NotApplicable
    }

    /// Positional item (`record[0]`).
    fn position(&self, _index: usize) -> Lookup {
        Lookup::NotApplicable
    }
}

/// A lazily evaluated collection of related records (a to-many relation).
pub trait RelatedRecords: Send + Sync + fmt::Debug {
    /// Materializes every element of the collection.
    fn all(&self) -> Vec<Value>;
}

/// A fixed collection of related records.
#[derive(Debug, Clone, Default)]
pub struct RecordSet(pub Vec<RecordRef>);

impl RelatedRecords for RecordSet {
    fn all(&self) -> Vec<Value> {
        self.0.iter().cloned().map(Value::Record).collect()
    }
}

/// Callable producing a value on demand.
pub type ValueFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Callable producing a string on demand.
pub type TextFn = Arc<dyn Fn() -> String + Send + Sync>;

/// A dynamic value read from a record.
#[derive(Clone)]
pub enum Value {
    /// Absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A string.
    Str(String),
    /// A calendar date, indexed as `YYYY-MM-DD`.
    Date(NaiveDate),
    /// A UTC timestamp, indexed as RFC 3339.
    DateTime(DateTime<Utc>),
    /// A time of day.
    Time(NaiveTime),
    /// A file attachment; `None` when no file is attached.
    File(Option<String>),
    /// An ordered sequence of values.
    List(Vec<Value>),
    /// A plain key/value mapping, in insertion order.
    Map(Vec<(String, Value)>),
    /// A nested record (to-one relation).
    Record(RecordRef),
    /// A to-many relation, materialized during path resolution.
    Related(Arc<dyn RelatedRecords>),
    /// A zero-argument callable, invoked during path resolution.
    Callable(ValueFn),
    /// A lazily evaluated string, forced at the end of path resolution.
    Lazy(TextFn),
}

impl Value {
    /// Wraps a closure as a callable value.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Value::Callable(Arc::new(f))
    }

    /// Wraps a closure as a lazily evaluated string.
    pub fn lazy<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Value::Lazy(Arc::new(f))
    }

    /// Wraps records as a to-many relation.
    pub fn related(records: Vec<RecordRef>) -> Self {
        Value::Related(Arc::new(RecordSet(records)))
    }

    /// Builds a mapping from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value counts as empty: null, false, zero, empty string,
    /// empty collection, or a missing file.
    pub fn is_falsy(&self) -> bool {
        match self {
            Value::Null | Value::File(None) => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::Str(s) => s.is_empty(),
            Value::File(Some(url)) => url.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Looks up a key of a [`Value::Map`].
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Equality used for the ignore sentinel.
    ///
    /// Records are equal when they share model name and primary key.
    /// Callables and lazy values are never equal to anything.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::File(a), Value::File(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
            }
            (Value::Record(a), Value::Record(b)) => same_record(a.as_ref(), b.as_ref()),
            _ => false,
        }
    }

    /// Converts the value to its indexable JSON form.
    ///
    /// Nested records become their primary key; relations, callables and
    /// lazy strings are evaluated.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null | Value::File(None) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => Json::String(dt.to_rfc3339()),
            Value::Time(t) => Json::String(format_time(t)),
            Value::File(Some(url)) => Json::String(url.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Json>>(),
            ),
            Value::Record(record) => record.primary_key(),
            Value::Related(set) => Json::Array(set.all().iter().map(Value::to_json).collect()),
            Value::Callable(f) => f().to_json(),
            Value::Lazy(f) => Json::String(f()),
        }
    }
}

/// ISO 8601 time of day, with fractional seconds only when present.
pub(crate) fn format_time(time: &NaiveTime) -> String {
    time.format("%H:%M:%S%.f").to_string()
}

pub(crate) fn same_record(a: &dyn Record, b: &dyn Record) -> bool {
    a.model_name() == b.model_name() && a.primary_key() == b.primary_key()
}

/// Canonical string form of a key, as used for search-engine `_id`s.
pub(crate) fn key_text(key: &RecordKey) -> String {
    match key {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Date(d) => write!(f, "Date({})", d),
            Value::DateTime(dt) => write!(f, "DateTime({})", dt.to_rfc3339()),
            Value::Time(t) => write!(f, "Time({})", t),
            Value::File(url) => write!(f, "File({:?})", url),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Record(record) => write!(
                f,
                "{}({})",
                record.model_name(),
                key_text(&record.primary_key())
            ),
            Value::Related(set) => f.debug_tuple("Related").field(set).finish(),
            Value::Callable(_) => write!(f, "Callable"),
            Value::Lazy(_) => write!(f, "Lazy"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<RecordRef> for Value {
    fn from(record: RecordRef) -> Self {
        Value::Record(record)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

/// A record backed by an ordered attribute list.
///
/// Useful for embedding the engine over stores that hand out untyped rows,
/// and for tests.
#[derive(Debug, Clone)]
pub struct DynamicRecord {
    model: String,
    key: RecordKey,
    attributes: Vec<(String, Value)>,
    missing_relations: Vec<String>,
}

impl DynamicRecord {
    /// Creates a record of `model` with the given primary key.
    pub fn new(model: impl Into<String>, key: impl Into<RecordKey>) -> Self {
        Self {
            model: model.into(),
            key: key.into(),
            attributes: Vec::new(),
            missing_relations: Vec::new(),
        }
    }

    /// Sets an attribute, replacing any previous value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Marks a to-one relation whose target row no longer exists.
    pub fn with_missing_relation(mut self, name: impl Into<String>) -> Self {
        self.missing_relations.push(name.into());
        self
    }

    /// Sets an attribute, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// The value of an attribute, if set.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Converts into a shared record handle.
    pub fn into_ref(self) -> RecordRef {
        Arc::new(self)
    }
}

impl Record for DynamicRecord {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn primary_key(&self) -> RecordKey {
        self.key.clone()
    }

    fn attribute(&self, name: &str) -> Lookup {
        if self.missing_relations.iter().any(|r| r == name) {
            return Lookup::DoesNotExist;
        }
        match self.get(name) {
            Some(value) => Lookup::Found(value.clone()),
            None => Lookup::NotApplicable,
        }
    }
}
