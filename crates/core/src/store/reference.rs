//! Reference caches: preferences, templates and themes.
//!
//! No sync semantics. A refresh replaces the whole collection.

use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

use super::connection::LocalStore;
use super::records::{ReferenceKind, ReferenceRecord};
use crate::Error;
use crate::model::now_millis;

impl LocalStore {
    /// Replace every entry of a reference collection. Returns the new count.
    pub async fn replace_references(
        &self, kind: ReferenceKind, items: Vec<(String, serde_json::Value)>,
    ) -> Result<usize, Error> {
        let table = kind.table();
        let now = now_millis();
        let count = self
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                tx.execute(&format!("DELETE FROM {table}"), [])?;
                for (id, data) in &items {
                    tx.execute(
                        &format!("INSERT OR REPLACE INTO {table} (id, data, refreshed_at) VALUES (?1, ?2, ?3)"),
                        params![id, serde_json::to_string(data)?, now],
                    )?;
                }
                tx.commit()?;
                Ok(items.len())
            })
            .await
            .map_err(Error::from)?;
        tracing::debug!(table, count, "reference cache refreshed");
        Ok(count)
    }

    pub async fn get_reference(&self, kind: ReferenceKind, id: &str) -> Result<Option<ReferenceRecord>, Error> {
        let table = kind.table();
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<ReferenceRecord>, Error> {
                let row: Option<(String, String, i64)> = conn
                    .query_row(
                        &format!("SELECT id, data, refreshed_at FROM {table} WHERE id = ?1"),
                        params![id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                row.map(|(id, data, refreshed_at)| -> Result<ReferenceRecord, Error> {
                    Ok(ReferenceRecord { id, data: serde_json::from_str(&data)?, refreshed_at })
                })
                .transpose()
            })
            .await
            .map_err(Error::from)
    }

    pub async fn list_references(&self, kind: ReferenceKind) -> Result<Vec<ReferenceRecord>, Error> {
        let table = kind.table();
        self.conn
            .call(move |conn| -> Result<Vec<ReferenceRecord>, Error> {
                let mut stmt = conn.prepare(&format!("SELECT id, data, refreshed_at FROM {table} ORDER BY id"))?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
                })?;

                let mut records = Vec::new();
                for row in rows {
                    let (id, data, refreshed_at) = row?;
                    records.push(ReferenceRecord { id, data: serde_json::from_str(&data)?, refreshed_at });
                }
                Ok(records)
            })
            .await
            .map_err(Error::from)
    }
}
