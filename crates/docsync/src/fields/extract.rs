//! Dotted-path value extraction.
//!
//! A path such as `manufacturer.country.name` is resolved one segment at a
//! time. Each segment runs an ordered chain of accessors:
//!
//! 1. keyed item lookup (`value["segment"]`)
//! 2. attribute lookup (`value.segment`)
//! 3. positional lookup when the segment is an integer (`value[0]`)
//!
//! The first accessor returning [`Lookup::Found`] wins. An attribute lookup
//! reporting [`Lookup::DoesNotExist`] (a dangling relation) short-circuits the
//! whole path to null. When every accessor reports
//! [`Lookup::NotApplicable`], required paths fail and optional paths yield
//! null.

use tracing::trace;

use crate::error::LookupError;
use crate::record::{Lookup, Value};

type Accessor = fn(&Value, &str) -> Lookup;

const ACCESSORS: [Accessor; 3] = [item_accessor, attribute_accessor, position_accessor];

fn item_accessor(value: &Value, segment: &str) -> Lookup {
    match value {
        Value::Map(_) => match value.get(segment) {
            Some(found) => Lookup::Found(found.clone()),
            None => Lookup::NotApplicable,
        },
        Value::Record(record) => record.item(segment),
        _ => Lookup::NotApplicable,
    }
}

fn attribute_accessor(value: &Value, segment: &str) -> Lookup {
    match value {
        Value::Record(record) => record.attribute(segment),
        _ => Lookup::NotApplicable,
    }
}

fn position_accessor(value: &Value, segment: &str) -> Lookup {
    let Ok(index) = segment.parse::<usize>() else {
        return Lookup::NotApplicable;
    };
    match value {
        Value::List(items) => match items.get(index) {
            Some(found) => Lookup::Found(found.clone()),
            None => Lookup::NotApplicable,
        },
        Value::Record(record) => record.position(index),
        _ => Lookup::NotApplicable,
    }
}

fn lookup(value: &Value, segment: &str) -> Lookup {
    for accessor in ACCESSORS {
        match accessor(value, segment) {
            Lookup::NotApplicable => continue,
            outcome => return outcome,
        }
    }
    Lookup::NotApplicable
}

/// Materializes relations and invokes callables.
fn settle(value: Value) -> Value {
    match value {
        Value::Related(set) => Value::List(set.all()),
        Value::Callable(f) => match f() {
            Value::Related(set) => Value::List(set.all()),
            other => other,
        },
        other => other,
    }
}

/// Resolves `path` against `value`.
///
/// A falsy starting value resolves to null. A value equal to `ignore` (see
/// [`Value::same_as`]) resolves to null. Lazy strings are forced.
pub fn resolve(
    value: &Value,
    path: &[String],
    required: bool,
    ignore: Option<&Value>,
) -> Result<Value, LookupError> {
    if value.is_falsy() {
        return Ok(Value::Null);
    }

    let mut current = value.clone();
    for segment in path {
        current = match lookup(&current, segment) {
            Lookup::Found(found) => settle(found),
            Lookup::DoesNotExist => {
                trace!(segment = %segment, "Related record does not exist");
                return Ok(Value::Null);
            }
            Lookup::NotApplicable if required => {
                return Err(LookupError {
                    segment: segment.clone(),
                    record: format!("{:?}", current),
                });
            }
            Lookup::NotApplicable => return Ok(Value::Null),
        };

        if current.is_null() {
            return Ok(Value::Null);
        }
    }

    if ignore.is_some_and(|sentinel| current.same_as(sentinel)) {
        return Ok(Value::Null);
    }

    match current {
        Value::Lazy(force) => Ok(Value::Str(force())),
        other => Ok(other),
    }
}

/// Splits a dotted attribute path into segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DynamicRecord;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn path(p: &str) -> Vec<String> {
        split_path(p)
    }

    fn car() -> Value {
        let manufacturer = DynamicRecord::new("Manufacturer", 7)
            .with("name", "Toyota")
            .with("country", Value::map([("code", "JP")]));
        Value::Record(
            DynamicRecord::new("Car", 1)
                .with("name", "Prius")
                .with("manufacturer", manufacturer.into_ref())
                .with("tags", vec!["hybrid", "compact"])
                .with_missing_relation("owner")
                .into_ref(),
        )
    }

    #[test]
    fn test_resolve_attribute_chain() {
        let value = resolve(&car(), &path("manufacturer.name"), false, None).unwrap();
        assert!(matches!(value, Value::Str(s) if s == "Toyota"));
    }

    #[test]
    fn test_resolve_mapping_then_position() {
        let value = resolve(&car(), &path("manufacturer.country.code"), false, None).unwrap();
        assert!(matches!(value, Value::Str(s) if s == "JP"));

        let value = resolve(&car(), &path("tags.1"), false, None).unwrap();
        assert!(matches!(value, Value::Str(s) if s == "compact"));
    }

    #[test]
    fn test_missing_optional_is_null() {
        let value = resolve(&car(), &path("color"), false, None).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_missing_required_fails() {
        let err = resolve(&car(), &path("manufacturer.founded"), true, None).unwrap_err();
        assert_eq!(err.segment, "founded");
        assert!(err.record.contains("Manufacturer(7)"));
    }

    #[test]
    fn test_dangling_relation_is_null_even_when_required() {
        let value = resolve(&car(), &path("owner.name"), true, None).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_null_short_circuits() {
        let record = Value::Record(DynamicRecord::new("Car", 1).with("manufacturer", Value::Null).into_ref());
        let value = resolve(&record, &path("manufacturer.name"), true, None).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_falsy_start_is_null() {
        let value = resolve(&Value::Null, &path("name"), true, None).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_callable_invoked_once_per_resolution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let record = Value::Record(
            DynamicRecord::new("Car", 1)
                .with(
                    "summary",
                    Value::callable(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Value::from("fast")
                    }),
                )
                .into_ref(),
        );

        let value = resolve(&record, &path("summary"), false, None).unwrap();
        assert!(matches!(value, Value::Str(s) if s == "fast"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_related_collection_materialized() {
        let parts = vec![
            DynamicRecord::new("Part", 1).with("name", "wheel").into_ref(),
            DynamicRecord::new("Part", 2).with("name", "door").into_ref(),
        ];
        let record = Value::Record(DynamicRecord::new("Car", 1).with("parts", Value::related(parts)).into_ref());

        let value = resolve(&record, &path("parts"), false, None).unwrap();
        assert!(matches!(value, Value::List(items) if items.len() == 2));
    }

    #[test]
    fn test_ignore_sentinel() {
        let sentinel = Value::Record(DynamicRecord::new("Manufacturer", 7).into_ref());
        let value = resolve(&car(), &path("manufacturer"), false, Some(&sentinel)).unwrap();
        assert!(value.is_null());

        let other = Value::Record(DynamicRecord::new("Manufacturer", 8).into_ref());
        let value = resolve(&car(), &path("manufacturer"), false, Some(&other)).unwrap();
        assert!(matches!(value, Value::Record(_)));
    }

    #[test]
    fn test_lazy_string_forced() {
        let record = Value::Record(
            DynamicRecord::new("Car", 1)
                .with("label", Value::lazy(|| "Voiture".to_string()))
                .into_ref(),
        );
        let value = resolve(&record, &path("label"), false, None).unwrap();
        assert!(matches!(value, Value::Str(s) if s == "Voiture"));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a.b.0"), vec!["a", "b", "0"]);
        assert!(split_path("").is_empty());
    }
}
