//! Record instances and typed entities
//!
//! A [`Record`] is one row of a registered entity: the store-assigned `id`
//! plus field values. Host types implementing [`Entity`] are converted to and
//! from records through their serde representation.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DatastoreError, Result};
use crate::schema::RegisteredSchema;
use crate::types::{EntityDefinition, Value};

/// One stored (or about-to-be-stored) instance of an entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Store-assigned identifier; `None` before creation
    pub id: Option<i64>,
    /// Field values by field name
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record without an id
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Set a field value
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Convert to a JSON object; `id` is included when set
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        if let Some(id) = self.id {
            object.insert("id".to_string(), serde_json::Value::from(id));
        }
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }

    /// Build a record from a JSON object, typing each value by its field
    ///
    /// An `id` of `null` or `0` means "not yet created". Keys that are not
    /// fields of the entity are rejected.
    pub fn from_json(schema: &RegisteredSchema, json: &serde_json::Value) -> Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| DatastoreError::validation("Record must be a JSON object"))?;

        let mut record = Record::new();

        for (key, raw) in object {
            if key == "id" {
                record.id = parse_id(raw)?;
                continue;
            }

            let field = schema.field(key).ok_or_else(|| {
                DatastoreError::validation(format!(
                    "Entity '{}' has no field '{}'",
                    schema.definition.name, key
                ))
            })?;

            let value = Value::from_json(field.value_type, raw).map_err(|e| {
                DatastoreError::validation(format!("Invalid value for field '{}': {}", key, e))
            })?;
            record.fields.insert(key.clone(), value);
        }

        Ok(record)
    }
}

fn parse_id(raw: &serde_json::Value) -> Result<Option<i64>> {
    match raw {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(None),
            Some(id) if id > 0 => Ok(Some(id)),
            _ => Err(DatastoreError::validation(format!("Invalid id: {}", n))),
        },
        other => Err(DatastoreError::validation(format!("Invalid id: {}", other))),
    }
}

/// A host type stored as an entity
///
/// The serde representation must be a JSON object whose keys are the declared
/// fields plus an optional `id`.
///
/// ```
/// use saas_datastore::{Entity, EntityDefinition, FieldDefinition, ValueType};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Widget {
///     #[serde(default)]
///     id: Option<i64>,
///     name: String,
///     count: i64,
/// }
///
/// impl Entity for Widget {
///     fn definition() -> EntityDefinition {
///         EntityDefinition::new(
///             "widget",
///             vec![
///                 FieldDefinition::new("name", ValueType::Text).not_null(),
///                 FieldDefinition::new("count", ValueType::Integer).default(0),
///             ],
///         )
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn definition() -> EntityDefinition;
}
