//! Connection management for the embedded store
//!
//! Every statement runs on a connection borrowed through [`ConnectionManager::read`]
//! or [`ConnectionManager::write`]. The returned [`ScopedConnection`] goes back
//! to the pool when dropped, on success and error paths alike. Write scopes
//! additionally hold a process-wide lock so only one writer is active at a time;
//! read scopes run concurrently (WAL journal).

use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqliteConnection};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::{StorageLocation, StoreConfig};
use crate::error::{DatastoreError, Result};

/// Owner of the pool and the write lock for one logical store
#[derive(Clone)]
pub struct ConnectionManager {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    location: StorageLocation,
}

impl ConnectionManager {
    /// Resolve the storage location, open the pool and probe for write access
    ///
    /// Any failure to create the directory, open the file or write to it is a
    /// [`DatastoreError::StorageUnavailable`].
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let location = config.location()?;

        let pool = match &location {
            StorageLocation::File { dir, path } => {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    DatastoreError::storage_unavailable(format!(
                        "Cannot create storage directory '{}': {}",
                        dir.display(),
                        e
                    ))
                })?;

                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(config.busy_timeout);

                SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        DatastoreError::storage_unavailable(format!(
                            "Cannot open database '{}': {}",
                            path.display(),
                            e
                        ))
                    })?
            }
            StorageLocation::Memory => {
                // Every connection to :memory: is its own database, so the pool
                // keeps exactly one alive for the life of the store.
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?
                    .busy_timeout(config.busy_timeout);

                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        DatastoreError::storage_unavailable(format!(
                            "Cannot open in-memory database: {}",
                            e
                        ))
                    })?
            }
        };

        let manager = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            location,
        };
        manager.probe_writable().await?;

        tracing::info!(location = ?manager.location, "datastore opened");
        Ok(manager)
    }

    async fn probe_writable(&self) -> Result<()> {
        let mut conn = self.write().await?;

        let probe = async {
            sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
            sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        };

        probe.await.map_err(|e| {
            DatastoreError::storage_unavailable(format!("Database is not writable: {}", e))
        })
    }

    /// Borrow a connection for reading
    pub async fn read(&self) -> Result<ScopedConnection> {
        let conn = self.acquire().await?;
        Ok(ScopedConnection {
            conn,
            write_guard: None,
        })
    }

    /// Borrow a connection for writing, waiting for any other writer to finish
    pub async fn write(&self) -> Result<ScopedConnection> {
        let guard = self.write_lock.clone().lock_owned().await;
        let conn = self.acquire().await?;
        Ok(ScopedConnection {
            conn,
            write_guard: Some(guard),
        })
    }

    async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolClosed => {
                DatastoreError::storage_unavailable("Datastore has been closed")
            }
            other => DatastoreError::Sql(other),
        })
    }

    /// Where the store keeps its data
    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Close the pool; later acquisitions fail with `StorageUnavailable`
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// A pooled connection held for the duration of one operation
///
/// Dropping it returns the connection to the pool and, for write scopes,
/// releases the write lock afterwards.
pub struct ScopedConnection {
    // Field order matters: the connection is released before the lock.
    conn: PoolConnection<Sqlite>,
    write_guard: Option<OwnedMutexGuard<()>>,
}

impl ScopedConnection {
    /// Whether this scope holds the write lock
    pub fn is_write(&self) -> bool {
        self.write_guard.is_some()
    }
}

impl Deref for ScopedConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
