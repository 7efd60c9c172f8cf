//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations.

use crate::Error;
use crate::migrations::{self, CACHE_MIGRATIONS};
use std::path::Path;
use tokio_rusqlite::Connection;

/// Cache tier database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread. One database holds every named cache.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

impl CacheDb {
    /// Open a database at the specified path.
    ///
    /// Creates the file (and parent directory) if it doesn't exist, applies
    /// performance pragmas, and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::StorageUnavailable(format!("cannot create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("cannot open cache {}: {e}", path.display())))?;
        Self::init(conn).await
    }

    /// Open an in-memory database for testing.
    ///
    /// Creates a temporary in-memory SQLite database with the same
    /// pragma configuration as file-based databases.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA temp_store=MEMORY;",
            )?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn, CACHE_MIGRATIONS).await?;

        Ok(Self { conn })
    }
}
