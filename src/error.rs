//! Error types for datastore operations

use thiserror::Error;

/// Errors that can occur during registration or data access
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Entity not registered: {0}")]
    EntityNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatastoreError {
    pub fn unsupported_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedType(msg.into())
    }

    pub fn duplicate_entity(msg: impl Into<String>) -> Self {
        Self::DuplicateEntity(msg.into())
    }

    pub fn schema_conflict(msg: impl Into<String>) -> Self {
        Self::SchemaConflict(msg.into())
    }

    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn entity_not_found(msg: impl Into<String>) -> Self {
        Self::EntityNotFound(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Whether this error is the ordinary "record does not exist" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DatastoreError>;
