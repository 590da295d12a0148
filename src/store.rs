//! Datastore - Main entry point for dynamic entity registration and data access
//!
//! This module provides the `Datastore` struct that owns the connection
//! manager and the entity registry for one embedded SQLite store.

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::dao::{Dao, TypedDao};
use crate::error::{DatastoreError, Result};
use crate::record::Entity;
use crate::registry::EntityRegistry;
use crate::schema::RegisteredSchema;
use crate::types::EntityDefinition;

/// Embedded store with runtime entity registration
///
/// Cloning is cheap; clones share the pool, the write lock and the registry.
#[derive(Clone)]
pub struct Datastore {
    connections: ConnectionManager,
    registry: Arc<EntityRegistry>,
}

impl Datastore {
    /// Open the store described by `config`
    ///
    /// This will:
    /// 1. Create the storage directory if needed
    /// 2. Open the database file (or an in-memory database)
    /// 3. Verify the database can be written
    ///
    /// The registry starts empty.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let connections = ConnectionManager::open(&config).await?;
        Ok(Self {
            connections,
            registry: Arc::new(EntityRegistry::new()),
        })
    }

    /// Open the store configured by `DB_PATH` / `DB_NAME`
    pub async fn from_env() -> Result<Self> {
        Self::open(StoreConfig::from_env()?).await
    }

    /// Get a reference to the connection manager
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an entity, creating its table if it does not exist yet
    pub async fn register(&self, definition: EntityDefinition) -> Result<Arc<RegisteredSchema>> {
        self.registry.register(definition, &self.connections).await
    }

    /// Register a host type's entity definition
    pub async fn register_entity<E: Entity>(&self) -> Result<Arc<RegisteredSchema>> {
        self.register(E::definition()).await
    }

    /// Look up a registered entity by name
    pub fn lookup(&self, name: &str) -> Result<Arc<RegisteredSchema>> {
        self.registry.lookup(name).ok_or_else(|| {
            DatastoreError::entity_not_found(format!("Entity '{}' is not registered", name))
        })
    }

    /// All registered entities, ordered by table name
    pub fn entities(&self) -> Vec<Arc<RegisteredSchema>> {
        self.registry.entities()
    }

    // =========================================================================
    // Data Access
    // =========================================================================

    /// DAO for a registered entity, by name
    pub fn dao(&self, name: &str) -> Result<Dao> {
        Ok(Dao::new(self.lookup(name)?, self.connections.clone()))
    }

    /// DAO for a definition
    ///
    /// The definition must already be registered with the same field set.
    pub fn dao_for(&self, definition: &EntityDefinition) -> Result<Dao> {
        let schema = self.lookup(&definition.name)?;
        if !schema.definition.same_fields(definition) {
            return Err(DatastoreError::duplicate_entity(format!(
                "Entity '{}' is registered with a different field set",
                definition.name
            )));
        }
        Ok(Dao::new(schema, self.connections.clone()))
    }

    /// Typed DAO for a registered host type
    pub fn typed_dao<E: Entity>(&self) -> Result<TypedDao<E>> {
        Ok(TypedDao::new(self.dao_for(&E::definition())?))
    }

    /// Close the connection pool
    ///
    /// DAOs obtained earlier fail with `StorageUnavailable` afterwards.
    pub async fn close(&self) {
        self.connections.close().await;
        tracing::info!("datastore closed");
    }
}
