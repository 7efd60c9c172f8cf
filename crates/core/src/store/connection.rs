//! Local Store connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations. It also
//! carries the collection-wide operations: counts, global clear, size
//! estimation and sync metadata.

use std::path::Path;

use crate::Error;
use crate::migrations::{self, STORE_MIGRATIONS};
use crate::store::records::Collection;
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params};

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

const LAST_SYNC_KEY: &str = "last_sync_at";

/// Local Store handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread. Calls are serialized on that thread, so each
/// `call` observes the writes of every call issued before it.
#[derive(Clone, Debug)]
pub struct LocalStore {
    pub(crate) conn: Connection,
}

impl LocalStore {
    /// Open a store at the specified path.
    ///
    /// Creates the file (and parent directory) if missing, applies pragmas
    /// and runs pending migrations. Any failure here is reported as
    /// `StorageUnavailable` so callers can fall back to a memory-only store.
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
            .map_err(|e| Error::StorageUnavailable(format!("cannot open {}: {e}", path.display())))?;

        Self::init(conn).await
    }

    /// Open an in-memory store for testing or memory-only operation.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(|e: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| Error::StorageUnavailable(e.to_string()))?;

        migrations::run(&conn, STORE_MIGRATIONS)
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: Collection) -> Result<u64, Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every record in every collection, in one transaction.
    pub async fn clear(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                for collection in Collection::ALL {
                    tx.execute(&format!("DELETE FROM {}", collection.table()), [])?;
                }
                tx.execute("DELETE FROM sync_meta", [])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;
        tracing::info!("local store cleared");
        Ok(())
    }

    /// Estimated bytes held by stored payloads, blobs and reference data.
    pub async fn estimated_bytes(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let total: i64 = conn.query_row(
                    "SELECT
                        (SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM presentations)
                      + (SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM slides)
                      + (SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM blocks)
                      + (SELECT COALESCE(SUM(LENGTH(blob)), 0) FROM assets)
                      + (SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM pending_changes)
                      + (SELECT COALESCE(SUM(LENGTH(data)), 0) FROM preferences)
                      + (SELECT COALESCE(SUM(LENGTH(data)), 0) FROM templates)
                      + (SELECT COALESCE(SUM(LENGTH(data)), 0) FROM themes)",
                    [],
                    |row| row.get(0),
                )?;
                Ok(total.max(0) as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Timestamp (ms) of the last sync pass that finished without failures.
    pub async fn last_sync_at(&self) -> Result<Option<i64>, Error> {
        self.conn
            .call(|conn| -> Result<Option<i64>, Error> {
                let value: Option<String> = conn
                    .query_row("SELECT value FROM sync_meta WHERE key = ?1", params![LAST_SYNC_KEY], |row| row.get(0))
                    .optional()?;
                value
                    .map(|v| v.parse::<i64>().map_err(|e| Error::Serialization(e.to_string())))
                    .transpose()
            })
            .await
            .map_err(Error::from)
    }

    /// Record a successful sync pass.
    pub async fn set_last_sync_at(&self, at: i64) -> Result<(), Error> {
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![LAST_SYNC_KEY, at.to_string()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Payload;
    use crate::store::records::Mutation;

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let version = store
            .conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn test_counts_start_empty() {
        let store = LocalStore::open_in_memory().await.unwrap();
        for collection in Collection::ALL {
            assert_eq!(store.count(collection).await.unwrap(), 0);
        }
        assert_eq!(store.estimated_bytes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_unusable_path_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let result = LocalStore::open(blocker.join("store.sqlite")).await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.sqlite");

        {
            let store = LocalStore::open(&path).await.unwrap();
            store
                .apply(
                    vec![Mutation::PutPresentation {
                        id: "p1".into(),
                        project_id: None,
                        payload: Payload::Json(serde_json::json!({"title": "Roadmap"})),
                    }],
                    1_000,
                )
                .await
                .unwrap();
        }

        let reopened = LocalStore::open(&path).await.unwrap();
        let record = reopened.get_presentation("p1").await.unwrap().unwrap();
        assert_eq!(record.last_modified, 1_000);
        assert_eq!(reopened.count(Collection::PendingChanges).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_last_sync() {
        let store = LocalStore::open_in_memory().await.unwrap();
        assert_eq!(store.last_sync_at().await.unwrap(), None);

        store.set_last_sync_at(42).await.unwrap();
        store.set_last_sync_at(43).await.unwrap();
        assert_eq!(store.last_sync_at().await.unwrap(), Some(43));

        store
            .apply(
                vec![Mutation::PutPresentation { id: "p1".into(), project_id: None, payload: Payload::Empty }],
                1,
            )
            .await
            .unwrap();
        assert!(store.estimated_bytes().await.unwrap() > 0);

        store.clear().await.unwrap();
        assert_eq!(store.count(Collection::Presentations).await.unwrap(), 0);
        assert_eq!(store.count(Collection::PendingChanges).await.unwrap(), 0);
        assert_eq!(store.last_sync_at().await.unwrap(), None);
    }
}
