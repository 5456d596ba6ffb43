//! Column attributes and their storable form.
//!
//! An [`Attribute`] is the typed description of one column: its [`DataType`]
//! plus optional constraint flags. [`flatten`] turns it into a
//! [`FlatAttribute`], a plain JSON object with every absent option removed,
//! which is what snapshots store and what the diff engine compares.
//! [`hydrate`] goes the other way.
//!
//! Options that are not set are never serialized, so two flattened
//! attributes compare equal exactly when their set options agree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Column data types understood by the engine.
///
/// Serialized with a `typekey` tag, e.g. `{"typekey":"STRING","length":255}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "typekey")]
pub enum DataType {
    /// 32-bit integer.
    #[serde(rename = "INTEGER")]
    Integer,
    /// 64-bit integer.
    #[serde(rename = "BIGINT")]
    BigInt,
    /// 16-bit integer.
    #[serde(rename = "SMALLINT")]
    SmallInt,
    /// Single precision float.
    #[serde(rename = "FLOAT")]
    Float,
    /// Double precision float.
    #[serde(rename = "DOUBLE")]
    Double,
    /// Fixed-point decimal.
    #[serde(rename = "DECIMAL")]
    Decimal {
        /// Total number of digits.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision: Option<u8>,
        /// Digits after the decimal point.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<u8>,
    },
    /// Variable-length string.
    #[serde(rename = "STRING")]
    String {
        /// Maximum length.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<u32>,
    },
    /// Fixed-length string.
    #[serde(rename = "CHAR")]
    Char {
        /// Length.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<u32>,
    },
    /// Unbounded text.
    #[serde(rename = "TEXT")]
    Text,
    /// Boolean.
    #[serde(rename = "BOOLEAN")]
    Boolean,
    /// Date and time.
    #[serde(rename = "DATE")]
    Date,
    /// Date without time.
    #[serde(rename = "DATEONLY")]
    DateOnly,
    /// Time without date.
    #[serde(rename = "TIME")]
    Time,
    /// UUID.
    #[serde(rename = "UUID")]
    Uuid,
    /// JSON document.
    #[serde(rename = "JSON")]
    Json,
    /// Binary JSON document.
    #[serde(rename = "JSONB")]
    Jsonb,
    /// Binary large object.
    #[serde(rename = "BLOB")]
    Blob,
    /// Embedding vector.
    #[serde(rename = "VECTOR")]
    Vector {
        /// Number of dimensions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dimensions: Option<u32>,
    },
    /// Enumerated string values.
    #[serde(rename = "ENUM")]
    Enum {
        /// Allowed values.
        #[serde(default)]
        values: Vec<String>,
    },
}

impl DataType {
    /// Returns the type identifier stored under `typekey`.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::SmallInt => "SMALLINT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Decimal { .. } => "DECIMAL",
            Self::String { .. } => "STRING",
            Self::Char { .. } => "CHAR",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::DateOnly => "DATEONLY",
            Self::Time => "TIME",
            Self::Uuid => "UUID",
            Self::Json => "JSON",
            Self::Jsonb => "JSONB",
            Self::Blob => "BLOB",
            Self::Vector { .. } => "VECTOR",
            Self::Enum { .. } => "ENUM",
        }
    }

    /// Returns whether this is one of the integer types.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInt | Self::SmallInt)
    }

    /// Variable-length string with the given maximum length.
    #[must_use]
    pub fn string(length: u32) -> Self {
        Self::String {
            length: Some(length),
        }
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum DefaultValue {
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String literal default.
    String(String),
    /// Raw SQL expression.
    Expression(String),
    /// Current timestamp at insert time.
    Now,
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    /// Error if referenced row is deleted/updated.
    NoAction,
    /// Same as `NoAction` but checked immediately.
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the referencing column to NULL.
    SetNull,
    /// Set the referencing column to its default.
    SetDefault,
}

impl ReferentialAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// Target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub key: String,
}

/// Typed description of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    /// Column data type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether this column is the primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<bool>,
    /// Whether NULL is allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_null: Option<bool>,
    /// Whether the column carries a UNIQUE constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    /// Whether values come from a sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_increment: Option<bool>,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<DefaultValue>,
    /// Physical column name, when it differs from the attribute name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Logical field name in the model layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    /// Foreign key target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Reference>,
    /// ON DELETE action of the foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    /// ON UPDATE action of the foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
    /// Column comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Attribute {
    /// Creates an attribute with only a data type set.
    #[must_use]
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            primary_key: None,
            allow_null: None,
            unique: None,
            auto_increment: None,
            default_value: None,
            field: None,
            field_name: None,
            references: None,
            on_delete: None,
            on_update: None,
            comment: None,
        }
    }

    /// Marks the column as primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = Some(true);
        self
    }

    /// Marks the column as auto-incrementing.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = Some(true);
        self
    }

    /// Disallows NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.allow_null = Some(false);
        self
    }

    /// Adds a UNIQUE constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = Some(true);
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Sets the physical column name.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Adds a foreign key to `table`.`key`.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>, key: impl Into<String>) -> Self {
        self.references = Some(Reference {
            table: table.into(),
            key: key.into(),
        });
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }

    /// Sets the column comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Returns whether the column is the primary key.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.primary_key == Some(true)
    }

    /// Returns whether the column auto-increments.
    #[must_use]
    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment == Some(true)
    }

    /// Returns whether the column accepts NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        !self.is_primary_key() && self.allow_null != Some(false)
    }

    /// Returns whether the column carries a UNIQUE constraint.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique == Some(true)
    }

    /// Returns this attribute reshaped into a valid primary key definition.
    ///
    /// Keeps the type, auto-increment flag and physical names; forces
    /// `primaryKey`, `unique` and NOT NULL; drops every other option.
    #[must_use]
    pub fn as_primary_key(&self) -> Self {
        Self {
            primary_key: Some(true),
            allow_null: Some(false),
            unique: Some(true),
            auto_increment: self.auto_increment,
            field: self.field.clone(),
            field_name: self.field_name.clone(),
            ..Self::new(self.data_type.clone())
        }
    }
}

impl From<DataType> for Attribute {
    fn from(data_type: DataType) -> Self {
        Self::new(data_type)
    }
}

/// Storable form of an [`Attribute`]: a JSON object without absent options.
///
/// Keys are kept sorted, so equality never depends on insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "Map<String, Value>", from = "StoredAttribute")]
pub struct FlatAttribute(Map<String, Value>);

/// Shapes accepted when loading a stored attribute.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredAttribute {
    /// Short form: just the type key, e.g. `"TEXT"`.
    Short(String),
    Full(Map<String, Value>),
}

impl From<StoredAttribute> for FlatAttribute {
    fn from(stored: StoredAttribute) -> Self {
        match stored {
            StoredAttribute::Short(key) => {
                let mut ty = Map::new();
                ty.insert("typekey".to_string(), Value::String(key));
                let mut map = Map::new();
                map.insert("type".to_string(), Value::Object(ty));
                Self(map)
            }
            StoredAttribute::Full(map) => Self(map),
        }
    }
}

impl From<FlatAttribute> for Map<String, Value> {
    fn from(flat: FlatAttribute) -> Self {
        flat.0
    }
}

impl FlatAttribute {
    /// Wraps an already-flattened JSON object.
    #[must_use]
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        map.retain(|_, v| !v.is_null());
        for value in map.values_mut() {
            strip_absent(value);
        }
        Self(map)
    }

    /// Returns the underlying JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates over the option keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether no key is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the type identifier (`type.typekey`).
    #[must_use]
    pub fn type_key(&self) -> Option<&str> {
        self.0.get("type")?.get("typekey")?.as_str()
    }

    /// Returns whether the flattened column is a primary key.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.0.get("primaryKey") == Some(&Value::Bool(true))
    }

    /// Returns the table named by `references.table`, if any.
    #[must_use]
    pub fn referenced_table(&self) -> Option<&str> {
        self.0.get("references")?.get("table")?.as_str()
    }

    /// Returns a copy holding only the given keys.
    #[must_use]
    pub fn subset<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Self {
        let mut map = Map::new();
        for key in keys {
            if let Some(value) = self.0.get(key) {
                map.insert(key.clone(), value.clone());
            }
        }
        Self(map)
    }

    /// Returns a copy with the given keys removed.
    #[must_use]
    pub fn without<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Self {
        let mut map = self.0.clone();
        for key in keys {
            map.remove(key);
        }
        Self(map)
    }

    /// Restores the typed attribute.
    pub fn hydrate(&self) -> Result<Attribute> {
        hydrate(self)
    }
}

/// Converts an attribute to its storable form.
///
/// Every JSON `null` is removed recursively, so absent options never show up
/// in comparisons.
pub fn flatten(attribute: &Attribute) -> Result<FlatAttribute> {
    let mut value = serde_json::to_value(attribute)?;
    strip_absent(&mut value);
    match value {
        Value::Object(map) => Ok(FlatAttribute(map)),
        _ => Err(<serde_json::Error as serde::ser::Error>::custom(
            "attribute did not serialize to an object",
        )
        .into()),
    }
}

/// Restores an attribute from its storable form.
///
/// The data type is rebuilt from `type.typekey`; an unknown key is an error.
pub fn hydrate(flat: &FlatAttribute) -> Result<Attribute> {
    Ok(serde_json::from_value(Value::Object(flat.0.clone()))?)
}

fn strip_absent(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                strip_absent(v);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_absent(item);
            }
        }
        _ => {}
    }
}
