//! Asset blob mirror.
//!
//! Assets are keyed by [`asset_id`] of their source URL, so caching the same
//! URL twice replaces the blob of a single record. Reads bump
//! `last_accessed`, which drives both the age sweep and the LRU purge.

use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row};

use super::connection::LocalStore;
use super::hash::asset_id;
use super::records::AssetRecord;
use crate::Error;
use crate::model::now_millis;

const ASSET_COLUMNS: &str = "id, source_url, blob, mime_type, last_accessed, cached_at";

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<AssetRecord> {
    Ok(AssetRecord {
        id: row.get(0)?,
        source_url: row.get(1)?,
        blob: row.get(2)?,
        mime_type: row.get(3)?,
        last_accessed: row.get(4)?,
        cached_at: row.get(5)?,
    })
}

impl LocalStore {
    /// Store (or replace) the blob for a source URL. Returns the asset id.
    pub async fn put_asset(&self, source_url: &str, blob: Vec<u8>, mime_type: Option<String>) -> Result<String, Error> {
        let source_url = source_url.trim().to_string();
        if source_url.is_empty() {
            return Err(Error::InvalidInput("source_url must not be empty".into()));
        }
        let id = asset_id(&source_url);
        let now = now_millis();
        let key = id.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO assets (id, source_url, blob, mime_type, last_accessed, cached_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        blob = excluded.blob,
                        mime_type = excluded.mime_type,
                        last_accessed = excluded.last_accessed,
                        cached_at = excluded.cached_at",
                    params![key, source_url, blob, mime_type, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;
        Ok(id)
    }

    /// Get an asset by id, bumping its access time.
    pub async fn get_asset(&self, id: &str) -> Result<Option<AssetRecord>, Error> {
        self.touch_and_get("id", id.to_string()).await
    }

    /// Get an asset by its source URL, bumping its access time.
    pub async fn get_asset_by_url(&self, source_url: &str) -> Result<Option<AssetRecord>, Error> {
        self.touch_and_get("source_url", source_url.trim().to_string()).await
    }

    async fn touch_and_get(&self, column: &'static str, key: String) -> Result<Option<AssetRecord>, Error> {
        let now = now_millis();
        self.conn
            .call(move |conn| -> Result<Option<AssetRecord>, Error> {
                let tx = conn.transaction()?;
                tx.execute(&format!("UPDATE assets SET last_accessed = ?2 WHERE {column} = ?1"), params![key, now])?;
                let record = tx
                    .query_row(
                        &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE {column} = ?1"),
                        params![key],
                        asset_from_row,
                    )
                    .optional()?;
                tx.commit()?;
                Ok(record)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn delete_asset(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM assets WHERE id = ?1", params![id])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove assets last accessed before `cutoff` (ms). Returns the number removed.
    pub async fn sweep_assets(&self, cutoff: i64) -> Result<u64, Error> {
        let deleted = self
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM assets WHERE last_accessed < ?1", params![cutoff])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)?;
        if deleted > 0 {
            tracing::info!(deleted, cutoff, "swept stale assets");
        }
        Ok(deleted)
    }

    /// Purge least recently accessed assets until at most `max_entries` remain.
    pub async fn purge_lru_assets(&self, max_entries: usize) -> Result<u64, Error> {
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?;
                if count <= max {
                    return Ok(0);
                }

                let deleted = conn.execute(
                    "DELETE FROM assets WHERE id IN (
                        SELECT id FROM assets ORDER BY last_accessed ASC, cached_at ASC LIMIT ?1
                    )",
                    params![count - max],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
