//! Pending change queue.
//!
//! Changes are drained in enqueue order: `enqueued_at`, then insertion id.

use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, Row};

use super::connection::LocalStore;
use super::records::{NewChange, PendingChange};
use crate::Error;
use crate::model::now_millis;

const CHANGE_COLUMNS: &str =
    "id, operation, entity_kind, entity_id, presentation_id, parent_id, payload, enqueued_at, retry_count, last_error";

fn change_from_row(row: &Row<'_>) -> rusqlite::Result<PendingChange> {
    Ok(PendingChange {
        id: row.get(0)?,
        operation: row.get(1)?,
        entity_kind: row.get(2)?,
        entity_id: row.get(3)?,
        presentation_id: row.get(4)?,
        parent_id: row.get(5)?,
        payload: row.get(6)?,
        enqueued_at: row.get(7)?,
        retry_count: row.get(8)?,
        last_error: row.get(9)?,
    })
}

impl LocalStore {
    /// Append a change to the queue without touching any document.
    ///
    /// Returns the queue id.
    pub async fn enqueue_change(&self, change: NewChange) -> Result<i64, Error> {
        if change.entity_id.trim().is_empty() {
            return Err(Error::InvalidInput("entity_id must not be empty".into()));
        }
        let at = now_millis();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO pending_changes
                        (operation, entity_kind, entity_id, presentation_id, parent_id, payload, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        change.operation,
                        change.entity_kind,
                        change.entity_id,
                        change.presentation_id,
                        change.parent_id,
                        change.payload,
                        at
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    /// Snapshot of the queue in drain order.
    pub async fn pending_changes(&self) -> Result<Vec<PendingChange>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<PendingChange>, Error> {
                let mut stmt =
                    conn.prepare(&format!("SELECT {CHANGE_COLUMNS} FROM pending_changes ORDER BY enqueued_at, id"))?;
                let rows = stmt.query_map([], change_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn pending_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Queue entries for a presentation and its children.
    pub async fn pending_count_for_presentation(&self, presentation_id: &str) -> Result<u64, Error> {
        let presentation_id = presentation_id.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM pending_changes WHERE presentation_id = ?1",
                    params![presentation_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a change after the remote store accepted it.
    pub async fn complete_change(&self, id: i64) -> Result<(), Error> {
        self.remove_change(id).await.map(|_| ())
    }

    /// Increment the retry count of a failed change.
    ///
    /// Returns the new retry count.
    pub async fn record_failure(&self, id: i64, message: &str) -> Result<u32, Error> {
        let message = message.to_string();
        self.conn
            .call(move |conn| -> Result<u32, Error> {
                let updated = conn.execute(
                    "UPDATE pending_changes SET retry_count = retry_count + 1, last_error = ?2 WHERE id = ?1",
                    params![id, message],
                )?;
                if updated == 0 {
                    return Err(Error::NotFound(format!("pending change {id}")));
                }
                let retries: u32 =
                    conn.query_row("SELECT retry_count FROM pending_changes WHERE id = ?1", params![id], |row| {
                        row.get(0)
                    })?;
                Ok(retries)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a change regardless of outcome. Returns whether it existed.
    pub async fn remove_change(&self, id: i64) -> Result<bool, Error> {
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM pending_changes WHERE id = ?1", params![id])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, OperationKind, Payload};

    fn change(entity_id: &str) -> NewChange {
        NewChange {
            operation: OperationKind::Update,
            entity_kind: EntityKind::Presentation,
            entity_id: entity_id.into(),
            presentation_id: Some(entity_id.into()),
            parent_id: None,
            payload: Some(Payload::Json(serde_json::json!({"v": 1}))),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let store = LocalStore::open_in_memory().await.unwrap();
        for id in ["a", "b", "c"] {
            store.enqueue_change(change(id)).await.unwrap();
        }

        let ids: Vec<String> = store.pending_changes().await.unwrap().into_iter().map(|c| c.entity_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_three_enqueued_two_synced_leaves_one() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let first = store.enqueue_change(change("a")).await.unwrap();
        let second = store.enqueue_change(change("b")).await.unwrap();
        store.enqueue_change(change("c")).await.unwrap();

        store.complete_change(first).await.unwrap();
        store.complete_change(second).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_failure_increments() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let id = store.enqueue_change(change("a")).await.unwrap();

        assert_eq!(store.record_failure(id, "status 500").await.unwrap(), 1);
        assert_eq!(store.record_failure(id, "status 502").await.unwrap(), 2);

        let stored = store.pending_changes().await.unwrap().remove(0);
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.last_error.as_deref(), Some("status 502"));

        assert!(matches!(store.record_failure(999, "x").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_count_for_presentation() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.enqueue_change(change("a")).await.unwrap();
        store.enqueue_change(change("a")).await.unwrap();
        store.enqueue_change(change("b")).await.unwrap();

        assert_eq!(store.pending_count_for_presentation("a").await.unwrap(), 2);
        assert!(store.remove_change(1).await.unwrap());
        assert!(!store.remove_change(1).await.unwrap());
        assert_eq!(store.pending_count_for_presentation("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_entity() {
        let store = LocalStore::open_in_memory().await.unwrap();
        assert!(matches!(store.enqueue_change(change("")).await, Err(Error::InvalidInput(_))));
    }
}
