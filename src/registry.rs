//! Entity registry
//!
//! Maps normalized entity names to their registered schemas. Populated during
//! the registration phase; there is no deregistration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::connection::ConnectionManager;
use crate::error::{DatastoreError, Result};
use crate::schema::{RegisteredSchema, ensure_table};
use crate::sql::sanitize::normalize_table_name;
use crate::types::EntityDefinition;

/// Registry of entity definitions and their backing tables
#[derive(Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<String, Arc<RegisteredSchema>>>,
    /// Serializes registrations so introspect-then-create never interleaves
    registration: Mutex<()>,
}

impl EntityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, synthesizing its table before returning
    ///
    /// Registering an identical definition again returns the existing schema
    /// without touching storage. The same name with a different field set is a
    /// [`DatastoreError::DuplicateEntity`]; a table on disk that does not match
    /// is a [`DatastoreError::SchemaConflict`]. A failed registration leaves
    /// the registry unchanged.
    pub async fn register(
        &self,
        definition: EntityDefinition,
        connections: &ConnectionManager,
    ) -> Result<Arc<RegisteredSchema>> {
        let schema = RegisteredSchema::build(definition)?;

        let _registration = self.registration.lock().await;

        if let Some(existing) = self.get(&schema.table_name) {
            if existing.definition.same_fields(&schema.definition) {
                tracing::debug!(entity = %schema.table_name, "already registered");
                return Ok(existing);
            }
            return Err(DatastoreError::duplicate_entity(format!(
                "Entity '{}' is already registered with a different field set",
                schema.table_name
            )));
        }

        {
            let mut conn = connections.write().await?;
            ensure_table(&mut conn, &schema).await?;
        }

        let schema = Arc::new(schema);
        self.entities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(schema.table_name.clone(), Arc::clone(&schema));

        tracing::info!(
            entity = %schema.definition.name,
            table = %schema.table_name,
            fields = schema.fields().len(),
            "registered entity"
        );
        Ok(schema)
    }

    /// Look up a registered schema by entity name (normalized before lookup)
    pub fn lookup(&self, name: &str) -> Option<Arc<RegisteredSchema>> {
        let key = normalize_table_name(name).ok()?;
        self.get(&key)
    }

    fn get(&self, key: &str) -> Option<Arc<RegisteredSchema>> {
        self.entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// All registered schemas, ordered by table name
    pub fn entities(&self) -> Vec<Arc<RegisteredSchema>> {
        let mut all: Vec<_> = self
            .entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        all
    }

    pub fn len(&self) -> usize {
        self.entities.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
