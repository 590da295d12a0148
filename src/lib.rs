//! # saas-datastore
//!
//! Dynamic entity registration and generic data access over an embedded SQLite
//! store.
//!
//! Feature modules describe the records they need at startup. The datastore
//! synthesizes one table per entity and hands out DAOs that create, read,
//! update and delete records without any per-entity SQL.
//!
//! ## Features
//!
//! - **Runtime Registration**: Entities are registered by definition; tables are created on demand
//! - **Idempotent Synthesis**: Existing tables are introspected and checked, never altered or dropped
//! - **Closed Type Set**: Integer, Real, Text, Boolean and Timestamp, mapped deterministically to SQLite columns
//! - **Generic DAOs**: One parameterized code path for every entity, plus a serde-backed typed layer
//! - **Serialized Writes**: One writer at a time, concurrent readers over a WAL journal
//! - **SQL Injection Prevention**: Identifiers are normalized, validated and quoted; values are always bound
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use saas_datastore::{Datastore, EntityDefinition, FieldDefinition, Record, StoreConfig, ValueType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Datastore::open(StoreConfig::builder("./data").build()).await?;
//!
//!     // Register an entity; its table is created before this returns
//!     store.register(EntityDefinition::new(
//!         "widget",
//!         vec![
//!             FieldDefinition::new("name", ValueType::Text).not_null(),
//!             FieldDefinition::new("count", ValueType::Integer).default(0),
//!         ],
//!     )).await?;
//!
//!     let widgets = store.dao("widget")?;
//!     let a = widgets.create(&Record::new().with("name", "a")).await?;
//!     assert_eq!(a.id, Some(1));
//!
//!     for widget in widgets.read_all().await? {
//!         println!("{}", widget.to_json());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The store is configured using `StoreConfig`:
//!
//! ```rust
//! use std::time::Duration;
//! use saas_datastore::StoreConfig;
//!
//! let config = StoreConfig::builder("./data")
//!     .file_name("application.db")              // Default file name
//!     .max_connections(8)                       // Pooled connections (default)
//!     .busy_timeout(Duration::from_secs(5))     // SQLite busy timeout (default)
//!     .build();
//!
//! // Or a private in-memory database
//! let memory = StoreConfig::in_memory();
//! ```
//!
//! `StoreConfig::from_env()` reads `DB_PATH` and `DB_NAME` instead.

pub mod config;
pub mod connection;
pub mod dao;
pub mod error;
pub mod record;
pub mod registry;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::{MEMORY_DB_NAME, StorageLocation, StoreConfig, StoreConfigBuilder};
pub use connection::{ConnectionManager, ScopedConnection};
pub use dao::{Dao, TypedDao};
pub use error::{DatastoreError, Result};
pub use record::{Entity, Record};
pub use registry::EntityRegistry;
pub use schema::{ColumnInfo, RegisteredSchema};
pub use store::Datastore;
pub use types::{
    ColumnSpec, EntityDefinition, EntityDescriptor, FieldDefinition, FieldDescriptor, Value,
    ValueType, map_type, map_type_name,
};

// Re-export SQL utilities for advanced users
pub use sql::ddl::DdlGenerator;
pub use sql::dml::DmlGenerator;
pub use sql::sanitize::{normalize_table_name, quote_identifier, validate_identifier};
