//! Configuration for the Datastore
//!
//! Provides a builder pattern for configuring where the embedded store lives
//! and how its connection pool behaves.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DatastoreError, Result};

/// Special file name selecting a private in-memory database
pub const MEMORY_DB_NAME: &str = ":memory:";

const DEFAULT_STORAGE_DIR: &str = "./data";
const DEFAULT_FILE_NAME: &str = "application.db";

/// Where the store keeps its data, resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// A database file inside a storage directory
    File { dir: PathBuf, path: PathBuf },
    /// A process-private in-memory database
    Memory,
}

/// Configuration for the datastore
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the database file (created if absent)
    pub storage_dir: PathBuf,
    /// Database file name, or `:memory:`
    pub file_name: String,
    /// Maximum pooled connections (readers); writes are serialized regardless
    pub max_connections: u32,
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder(storage_dir: impl Into<PathBuf>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(storage_dir)
    }

    /// Configuration for an in-memory store
    pub fn in_memory() -> Self {
        StoreConfigBuilder::new("").file_name(MEMORY_DB_NAME).build()
    }

    /// Build a configuration from `DB_PATH` and `DB_NAME`
    ///
    /// Defaults are `./data` and `application.db`. An empty `DB_PATH` is only
    /// accepted together with `DB_NAME=:memory:`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let storage_dir = lookup("DB_PATH").unwrap_or_else(|| DEFAULT_STORAGE_DIR.to_string());
        let file_name = lookup("DB_NAME").unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

        let config = StoreConfig::builder(storage_dir)
            .file_name(file_name)
            .build();
        config.location()?;
        Ok(config)
    }

    /// Resolve the storage location
    pub fn location(&self) -> Result<StorageLocation> {
        if self.file_name == MEMORY_DB_NAME {
            return Ok(StorageLocation::Memory);
        }
        if self.file_name.is_empty() {
            return Err(DatastoreError::storage_unavailable(
                "Database file name cannot be empty",
            ));
        }
        if self.storage_dir.as_os_str().is_empty() {
            return Err(DatastoreError::storage_unavailable(
                "Storage directory cannot be empty for file-based databases. Set DB_PATH or use :memory: for DB_NAME.",
            ));
        }
        Ok(StorageLocation::File {
            dir: self.storage_dir.clone(),
            path: self.storage_dir.join(&self.file_name),
        })
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    storage_dir: PathBuf,
    file_name: String,
    max_connections: u32,
    busy_timeout: Duration,
}

impl StoreConfigBuilder {
    /// Create a new builder with the storage directory
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Set the database file name (default: "application.db")
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Set the pool size (default: 8, at least 1)
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    /// Set the SQLite busy timeout (default: 5s)
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            storage_dir: self.storage_dir,
            file_name: self.file_name,
            max_connections: self.max_connections,
            busy_timeout: self.busy_timeout,
        }
    }
}
