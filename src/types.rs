//! Core type definitions for the Datastore
//!
//! Includes the closed set of value types, typed values, field and entity
//! definitions, and the type mapper that turns a field into a column spec.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DatastoreError, Result};

// ============================================================================
// Value Types
// ============================================================================

/// Primitive type of a declared field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// 64-bit signed integer (INTEGER)
    Integer,
    /// 64-bit float (REAL)
    Real,
    /// UTF-8 text (TEXT)
    Text,
    /// Boolean stored as 0/1 (TINYINT)
    Boolean,
    /// UTC instant stored as RFC 3339 text (TEXT)
    Timestamp,
}

impl ValueType {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::Real => "real",
            ValueType::Text => "text",
            ValueType::Boolean => "boolean",
            ValueType::Timestamp => "timestamp",
        }
    }

    /// Declared SQLite column type
    ///
    /// Every type maps to a distinct declared type except timestamp, which
    /// shares TEXT affinity with text.
    pub fn to_sql_type(&self) -> &'static str {
        match self {
            ValueType::Integer => "INTEGER",
            ValueType::Real => "REAL",
            ValueType::Text => "TEXT",
            ValueType::Boolean => "TINYINT",
            ValueType::Timestamp => "TEXT",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = DatastoreError;

    /// Parse a type name from a dynamic shape description
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "integer" | "int" | "i64" => Ok(ValueType::Integer),
            "real" | "float" | "double" | "f64" => Ok(ValueType::Real),
            "text" | "string" | "str" => Ok(ValueType::Text),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "timestamp" | "datetime" => Ok(ValueType::Timestamp),
            other => Err(DatastoreError::unsupported_type(format!(
                "'{}' has no column mapping (supported: integer, real, text, boolean, timestamp)",
                other
            ))),
        }
    }
}

// ============================================================================
// Typed Values
// ============================================================================

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value's type, `None` for null
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Real(_) => Some(ValueType::Real),
            Value::Text(_) => Some(ValueType::Text),
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Timestamp(_) => Some(ValueType::Timestamp),
        }
    }

    /// Whether the value can be stored in a field of the given type
    ///
    /// Null is handled by the nullable flag, not type checking.
    pub fn conforms_to(&self, value_type: ValueType) -> bool {
        match self.value_type() {
            None => true,
            Some(ValueType::Integer) if value_type == ValueType::Real => true,
            Some(t) => t == value_type,
        }
    }

    /// Widen to the field's type (integer into real); other values are unchanged
    pub fn coerce_to(self, value_type: ValueType) -> Value {
        match (self, value_type) {
            (Value::Integer(i), ValueType::Real) => Value::Real(i as f64),
            (v, _) => v,
        }
    }

    /// Render as an SQL literal for a DDL DEFAULT clause
    pub fn to_sql_literal(&self) -> Result<String> {
        Ok(match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => {
                if !f.is_finite() {
                    return Err(DatastoreError::validation(format!(
                        "Default value {} is not a finite number",
                        f
                    )));
                }
                format!("{:?}", f)
            }
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Timestamp(ts) => format!("'{}'", encode_timestamp(ts)),
        })
    }

    /// Convert to JSON; timestamps become RFC 3339 strings
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Timestamp(ts) => serde_json::Value::String(encode_timestamp(ts)),
        }
    }

    /// Convert a JSON value to a typed value for a field of `value_type`
    ///
    /// Accepts the usual string coercions (numeric strings, "true"/"yes"/"1").
    pub fn from_json(
        value_type: ValueType,
        value: &serde_json::Value,
    ) -> std::result::Result<Value, String> {
        use serde_json::Value as J;

        if value.is_null() {
            return Ok(Value::Null);
        }

        match (value_type, value) {
            (ValueType::Text, J::String(s)) => Ok(Value::Text(s.clone())),
            (ValueType::Integer, J::Number(n)) => n
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| format!("Cannot convert {} to integer", n)),
            (ValueType::Integer, J::String(s)) => s
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("Cannot convert '{}' to integer", s)),
            (ValueType::Real, J::Number(n)) => n
                .as_f64()
                .map(Value::Real)
                .ok_or_else(|| format!("Cannot convert {} to real", n)),
            (ValueType::Real, J::String(s)) => s
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| format!("Cannot convert '{}' to real", s)),
            (ValueType::Boolean, J::Bool(b)) => Ok(Value::Boolean(*b)),
            (ValueType::Boolean, J::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Value::Boolean(false)),
                Some(1) => Ok(Value::Boolean(true)),
                _ => Err(format!("Cannot convert {} to boolean", n)),
            },
            (ValueType::Boolean, J::String(s)) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Boolean(true)),
                "false" | "0" | "no" => Ok(Value::Boolean(false)),
                _ => Err(format!("Cannot convert '{}' to boolean", s)),
            },
            (ValueType::Timestamp, J::String(s)) => decode_timestamp(s)
                .map(Value::Timestamp)
                .map_err(|e| format!("Invalid timestamp format: {}", e)),
            _ => Err(format!("Type mismatch: expected {}, got {}", value_type, value)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Encode a timestamp the way it is stored: RFC 3339, UTC, `Z` suffix
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Whether a timestamp has a four-digit year, the range RFC 3339 text can hold
pub fn timestamp_in_range(ts: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&ts.year())
}

/// Decode a stored or supplied RFC 3339 timestamp into UTC
pub fn decode_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Type Mapper
// ============================================================================

/// Column definition derived from a field's type, optionality and default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Declared SQLite type
    pub sql_type: &'static str,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Rendered DEFAULT literal, if any
    pub default_literal: Option<String>,
    /// Whether the column carries a `CHECK (col IN (0, 1))` constraint
    pub zero_one_check: bool,
}

/// Map a field's type description to its column spec
///
/// Pure: the same input always yields the same spec. A default that does not
/// conform to the value type is rejected.
pub fn map_type(
    value_type: ValueType,
    nullable: bool,
    default: Option<&Value>,
) -> Result<ColumnSpec> {
    let default_literal = match default {
        None => None,
        Some(v) if !v.conforms_to(value_type) => {
            return Err(DatastoreError::validation(format!(
                "Default {:?} does not match type {}",
                v, value_type
            )));
        }
        Some(v) if v.is_null() && !nullable => {
            return Err(DatastoreError::validation(
                "NULL default on a non-nullable field",
            ));
        }
        Some(Value::Timestamp(ts)) if !timestamp_in_range(ts) => {
            return Err(DatastoreError::validation(format!(
                "Default timestamp {} is outside years 0000-9999",
                encode_timestamp(ts)
            )));
        }
        Some(v) => Some(v.clone().coerce_to(value_type).to_sql_literal()?),
    };

    Ok(ColumnSpec {
        sql_type: value_type.to_sql_type(),
        nullable,
        default_literal,
        zero_one_check: value_type == ValueType::Boolean,
    })
}

/// Map a type given by name, as found in dynamic shape descriptions
pub fn map_type_name(
    type_name: &str,
    nullable: bool,
    default: Option<&Value>,
) -> Result<ColumnSpec> {
    map_type(type_name.parse()?, nullable, default)
}

// ============================================================================
// Field and Entity Definitions
// ============================================================================

/// One declared field of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    /// Field name (becomes the column name)
    pub name: String,
    /// Primitive type
    pub value_type: ValueType,
    /// Whether the field may be NULL (default: true)
    pub nullable: bool,
    /// Value used when the field is not supplied
    pub default: Option<Value>,
}

impl FieldDefinition {
    /// Create a nullable field with no default
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable: true,
            default: None,
        }
    }

    /// Set the field as non-nullable
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set a default value
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Column spec for this field
    pub fn column_spec(&self) -> Result<ColumnSpec> {
        map_type(self.value_type, self.nullable, self.default.as_ref())
    }

    /// Whether two fields map to the same column and fallback
    ///
    /// Defaults are compared after widening, so `default(0)` and
    /// `default(0.0)` on a real field are the same.
    pub fn same_shape(&self, other: &FieldDefinition) -> bool {
        let widen = |f: &FieldDefinition| f.default.clone().map(|v| v.coerce_to(f.value_type));

        self.name == other.name
            && self.value_type == other.value_type
            && self.nullable == other.nullable
            && widen(self) == widen(other)
    }

    /// Value stored when the field is absent from a record
    ///
    /// `None` means the field is required.
    pub fn fallback(&self) -> Option<Value> {
        match &self.default {
            Some(v) => Some(v.clone().coerce_to(self.value_type)),
            None if self.nullable => Some(Value::Null),
            None => None,
        }
    }
}

/// A named, ordered list of typed fields describing a storable record shape
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDefinition {
    /// Entity name (case-normalized into the table name)
    pub name: String,
    /// Fields in declaration order, excluding the implicit `id`
    pub fields: Vec<FieldDefinition>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Append a field
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Find a field by name
    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether two definitions declare the same field set
    pub fn same_fields(&self, other: &EntityDefinition) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.same_shape(b))
    }
}

// ============================================================================
// Dynamic Descriptors
// ============================================================================

/// Field as described by an external module, before type checking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

fn default_nullable() -> bool {
    true
}

/// Entity as described by an external module, before type checking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl TryFrom<FieldDescriptor> for FieldDefinition {
    type Error = DatastoreError;

    fn try_from(desc: FieldDescriptor) -> Result<Self> {
        let value_type: ValueType = desc.type_name.parse()?;
        let default = desc
            .default
            .as_ref()
            .map(|v| Value::from_json(value_type, v))
            .transpose()
            .map_err(|e| {
                DatastoreError::validation(format!("Invalid default for '{}': {}", desc.name, e))
            })?;

        Ok(FieldDefinition {
            name: desc.name,
            value_type,
            nullable: desc.nullable,
            default,
        })
    }
}

impl TryFrom<EntityDescriptor> for EntityDefinition {
    type Error = DatastoreError;

    fn try_from(desc: EntityDescriptor) -> Result<Self> {
        let fields = desc
            .fields
            .into_iter()
            .map(FieldDefinition::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(EntityDefinition::new(desc.name, fields))
    }
}

impl EntityDefinition {
    /// Parse a JSON shape description
    ///
    /// ```
    /// use saas_datastore::EntityDefinition;
    ///
    /// let def = EntityDefinition::from_json(serde_json::json!({
    ///     "name": "widget",
    ///     "fields": [
    ///         {"name": "name", "type": "text", "nullable": false},
    ///         {"name": "count", "type": "integer", "default": 0}
    ///     ]
    /// })).unwrap();
    /// assert_eq!(def.fields.len(), 2);
    /// ```
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let desc: EntityDescriptor = serde_json::from_value(value)?;
        desc.try_into()
    }
}
