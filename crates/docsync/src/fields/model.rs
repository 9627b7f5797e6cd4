//! Model schemas and the model-field to index-field table.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Field, FieldType};

/// Kinds of columns a model schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
// Variants are the model column types
#[allow(missing_docs)]
pub enum ModelFieldKind {
    Auto,
    BigAuto,
    BigInteger,
    Boolean,
    Char,
    Date,
    DateTime,
    Decimal,
    Duration,
    Email,
    File,
    FilePath,
    Float,
    GenericIp,
    Image,
    Integer,
    Json,
    NullBoolean,
    PositiveInteger,
    PositiveSmallInteger,
    Slug,
    SmallInteger,
    Text,
    Time,
    Url,
    Uuid,
    Binary,
    ForeignKey,
    OneToOne,
    ManyToMany,
}

impl ModelFieldKind {
    /// The index field type a column of this kind maps to, if any.
    ///
    /// Relations, binary blobs, durations and JSON columns have no direct
    /// equivalent and must be declared explicitly on the document.
    pub fn index_type(&self) -> Option<FieldType> {
        use ModelFieldKind::*;
        let field_type = match self {
            Auto | Integer | PositiveInteger => FieldType::Integer,
            BigAuto | BigInteger => FieldType::Long,
            SmallInteger | PositiveSmallInteger => FieldType::Short,
            Boolean | NullBoolean => FieldType::Boolean,
            Char | Email | Text | Url => FieldType::Text,
            FilePath | Slug | Uuid => FieldType::Keyword,
            Date | DateTime => FieldType::Date,
            Decimal | Float => FieldType::Double,
            File | Image => FieldType::File,
            GenericIp => FieldType::Ip,
            Time => FieldType::Time,
            Duration | Json | Binary | ForeignKey | OneToOne | ManyToMany => return None,
        };
        Some(field_type)
    }

    /// Builds the index field for a column named `name`.
    pub fn to_field(&self, name: &str) -> Option<Field> {
        self.index_type()
            .map(|field_type| Field::scalar(field_type).with_default_path(name))
    }
}

impl fmt::Display for ModelFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The column layout of a model type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    name: String,
    fields: Vec<(String, ModelFieldKind)>,
}

impl ModelSchema {
    /// Creates an empty instance.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Declares a column.
    pub fn field(mut self, name: impl Into<String>, kind: ModelFieldKind) -> Self {
        self.fields.push((name.into(), kind));
        self
    }

    /// The name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared columns, in declaration order.
    pub fn fields(&self) -> &[(String, ModelFieldKind)] {
        &self.fields
    }

    /// The kind of column `name`, if declared.
    pub fn get_field(&self, name: &str) -> Option<ModelFieldKind> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, kind)| *kind)
    }
}
