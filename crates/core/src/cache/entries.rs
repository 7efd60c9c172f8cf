//! Named caches of HTTP responses.
//!
//! Entries are keyed by (cache name, URL). Putting an entry implicitly opens
//! its cache.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

/// A stored response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// RFC 3339 with microsecond precision; orders LRU trimming.
    pub stored_at: String,
}

impl CachedResponse {
    /// A response stamped with the current time.
    pub fn new(url: impl Into<String>, status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self { url: url.into(), status, content_type, headers: Vec::new(), body, stored_at: timestamp() }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

impl CacheDb {
    /// Create a named cache if it does not exist yet.
    pub async fn open_cache(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        let now = timestamp();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)", params![name, now])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Names of every cache, sorted.
    pub async fn cache_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Drop a cache and all of its entries. Returns whether it existed.
    pub async fn delete_cache(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM cache_entries WHERE cache_name = ?1", params![name])?;
                let deleted = tx.execute("DELETE FROM caches WHERE name = ?1", params![name])?;
                tx.commit()?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Look up the response stored for `url`.
    pub async fn match_url(&self, cache: &str, url: &str) -> Result<Option<CachedResponse>, Error> {
        let cache = cache.to_string();
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let row = conn
                    .query_row(
                        "SELECT url, status, content_type, headers_json, body, stored_at
                         FROM cache_entries WHERE cache_name = ?1 AND url = ?2",
                        params![cache, url],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, u16>(1)?,
                                row.get::<_, Option<String>>(2)?,
                                row.get::<_, Option<String>>(3)?,
                                row.get::<_, Vec<u8>>(4)?,
                                row.get::<_, String>(5)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((url, status, content_type, headers_json, body, stored_at)) = row else {
                    return Ok(None);
                };
                let headers = match headers_json {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Vec::new(),
                };
                Ok(Some(CachedResponse { url, status, content_type, headers, body, stored_at }))
            })
            .await
            .map_err(Error::from)
    }

    /// Store a response, replacing any previous entry for the same URL.
    pub async fn put(&self, cache: &str, response: &CachedResponse) -> Result<(), Error> {
        let cache = cache.to_string();
        let response = response.clone();
        let headers_json = if response.headers.is_empty() { None } else { Some(serde_json::to_string(&response.headers)?) };
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
                    params![cache, response.stored_at],
                )?;
                tx.execute(
                    "INSERT INTO cache_entries (cache_name, url, status, content_type, headers_json, body, stored_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(cache_name, url) DO UPDATE SET
                        status = excluded.status,
                        content_type = excluded.content_type,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![
                        cache,
                        response.url,
                        response.status,
                        response.content_type,
                        headers_json,
                        response.body,
                        response.stored_at
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    pub async fn delete(&self, cache: &str, url: &str) -> Result<bool, Error> {
        let cache = cache.to_string();
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted =
                    conn.execute("DELETE FROM cache_entries WHERE cache_name = ?1 AND url = ?2", params![cache, url])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// URLs stored in a cache, oldest first.
    pub async fn keys(&self, cache: &str) -> Result<Vec<String>, Error> {
        let cache = cache.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt =
                    conn.prepare("SELECT url FROM cache_entries WHERE cache_name = ?1 ORDER BY stored_at, url")?;
                let rows = stmt.query_map(params![cache], |row| row.get(0))?;
                Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Purge oldest entries until count <= max_entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_lru(&self, cache: &str, max_entries: usize) -> Result<u64, Error> {
        let cache = cache.to_string();
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?1",
                    params![cache],
                    |row| row.get(0),
                )?;
                if count <= max {
                    return Ok(0);
                }

                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE cache_name = ?1 AND url IN (
                        SELECT url FROM cache_entries WHERE cache_name = ?1 ORDER BY stored_at ASC LIMIT ?2
                    )",
                    params![cache, count - max],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
