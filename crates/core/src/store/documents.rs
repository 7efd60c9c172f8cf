//! Presentation, slide and block documents.
//!
//! Local edits go through [`LocalStore::apply`], which writes the documents
//! and their pending changes in a single transaction. The remaining writers
//! (`cache_remote_presentation`, `adopt_remote`, `mark_synced`) record state
//! that already matches the remote store and never touch the queue.

use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row, Transaction};

use super::connection::LocalStore;
use super::records::{BlockRecord, Mutation, NewChange, PresentationRecord, SlideRecord};
use crate::Error;
use crate::model::{EntityKind, OperationKind, Payload};

const PRESENTATION_COLUMNS: &str = "id, project_id, payload, last_modified, synced";
const SLIDE_COLUMNS: &str = "id, presentation_id, position, payload, last_modified";
const BLOCK_COLUMNS: &str = "id, slide_id, position, payload, last_modified";

fn presentation_from_row(row: &Row<'_>) -> rusqlite::Result<PresentationRecord> {
    Ok(PresentationRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        payload: row.get(2)?,
        last_modified: row.get(3)?,
        synced: row.get::<_, i64>(4)? == 1,
    })
}

fn slide_from_row(row: &Row<'_>) -> rusqlite::Result<SlideRecord> {
    Ok(SlideRecord {
        id: row.get(0)?,
        presentation_id: row.get(1)?,
        position: row.get(2)?,
        payload: row.get(3)?,
        last_modified: row.get(4)?,
    })
}

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<BlockRecord> {
    Ok(BlockRecord {
        id: row.get(0)?,
        slide_id: row.get(1)?,
        position: row.get(2)?,
        payload: row.get(3)?,
        last_modified: row.get(4)?,
    })
}

fn require_id(id: &str) -> Result<(), Error> {
    if id.trim().is_empty() {
        return Err(Error::InvalidInput("id must not be empty".into()));
    }
    Ok(())
}

fn exists(tx: &Transaction<'_>, table: &str, id: &str) -> Result<bool, Error> {
    let found: bool =
        tx.query_row(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"), params![id], |row| row.get(0))?;
    Ok(found)
}

fn slide_parent(tx: &Transaction<'_>, slide_id: &str) -> Result<Option<String>, Error> {
    Ok(tx
        .query_row("SELECT presentation_id FROM slides WHERE id = ?1", params![slide_id], |row| row.get(0))
        .optional()?)
}

/// (slide id, presentation id) owning a block.
fn block_parents(tx: &Transaction<'_>, block_id: &str) -> Result<Option<(String, Option<String>)>, Error> {
    Ok(tx
        .query_row(
            "SELECT b.slide_id, s.presentation_id FROM blocks b LEFT JOIN slides s ON s.id = b.slide_id WHERE b.id = ?1",
            params![block_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

/// Child edits make the owning presentation dirty.
fn touch_presentation(tx: &Transaction<'_>, presentation_id: &str, at: i64) -> Result<(), Error> {
    tx.execute(
        "UPDATE presentations SET last_modified = MAX(last_modified, ?2), synced = 0 WHERE id = ?1",
        params![presentation_id, at],
    )?;
    Ok(())
}

fn enqueue(tx: &Transaction<'_>, change: NewChange, at: i64) -> Result<(), Error> {
    tx.execute(
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
    Ok(())
}

fn change(
    operation: OperationKind, entity_kind: EntityKind, entity_id: &str, presentation_id: Option<&str>,
    parent_id: Option<&str>, payload: Option<&Payload>,
) -> NewChange {
    NewChange {
        operation,
        entity_kind,
        entity_id: entity_id.to_string(),
        presentation_id: presentation_id.map(str::to_string),
        parent_id: parent_id.map(str::to_string),
        payload: payload.cloned(),
    }
}

fn apply_one(tx: &Transaction<'_>, mutation: &Mutation, at: i64) -> Result<(), Error> {
    match mutation {
        Mutation::PutPresentation { id, project_id, payload } => {
            require_id(id)?;
            let operation = if exists(tx, "presentations", id)? { OperationKind::Update } else { OperationKind::Create };
            tx.execute(
                "INSERT INTO presentations (id, project_id, payload, last_modified, synced)
                 VALUES (?1, ?2, ?3, ?4, 0)
                 ON CONFLICT(id) DO UPDATE SET
                    project_id = COALESCE(excluded.project_id, presentations.project_id),
                    payload = excluded.payload,
                    last_modified = excluded.last_modified,
                    synced = 0",
                params![id, project_id, payload, at],
            )?;
            let project = project_id.as_deref();
            enqueue(tx, change(operation, EntityKind::Presentation, id, Some(id), project, Some(payload)), at)
        }
        Mutation::DeletePresentation { id } => {
            require_id(id)?;
            tx.execute(
                "DELETE FROM blocks WHERE slide_id IN (SELECT id FROM slides WHERE presentation_id = ?1)",
                params![id],
            )?;
            tx.execute("DELETE FROM slides WHERE presentation_id = ?1", params![id])?;
            tx.execute("DELETE FROM presentations WHERE id = ?1", params![id])?;
            enqueue(tx, change(OperationKind::Delete, EntityKind::Presentation, id, Some(id), None, None), at)
        }
        Mutation::PutSlide { id, presentation_id, position, payload } => {
            require_id(id)?;
            if !exists(tx, "presentations", presentation_id)? {
                return Err(Error::NotFound(format!("presentation {presentation_id}")));
            }
            let operation = if exists(tx, "slides", id)? { OperationKind::Update } else { OperationKind::Create };
            tx.execute(
                "INSERT INTO slides (id, presentation_id, position, payload, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    presentation_id = excluded.presentation_id,
                    position = excluded.position,
                    payload = excluded.payload,
                    last_modified = excluded.last_modified",
                params![id, presentation_id, position, payload, at],
            )?;
            touch_presentation(tx, presentation_id, at)?;
            let parent = Some(presentation_id.as_str());
            enqueue(tx, change(operation, EntityKind::Slide, id, parent, parent, Some(payload)), at)
        }
        Mutation::DeleteSlide { id } => {
            require_id(id)?;
            let parent = slide_parent(tx, id)?;
            tx.execute("DELETE FROM blocks WHERE slide_id = ?1", params![id])?;
            tx.execute("DELETE FROM slides WHERE id = ?1", params![id])?;
            if let Some(parent) = &parent {
                touch_presentation(tx, parent, at)?;
            }
            let parent = parent.as_deref();
            enqueue(tx, change(OperationKind::Delete, EntityKind::Slide, id, parent, parent, None), at)
        }
        Mutation::PutBlock { id, slide_id, position, payload } => {
            require_id(id)?;
            let parent = slide_parent(tx, slide_id)?.ok_or_else(|| Error::NotFound(format!("slide {slide_id}")))?;
            let operation = if exists(tx, "blocks", id)? { OperationKind::Update } else { OperationKind::Create };
            tx.execute(
                "INSERT INTO blocks (id, slide_id, position, payload, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    slide_id = excluded.slide_id,
                    position = excluded.position,
                    payload = excluded.payload,
                    last_modified = excluded.last_modified",
                params![id, slide_id, position, payload, at],
            )?;
            touch_presentation(tx, &parent, at)?;
            let queued = change(operation, EntityKind::Block, id, Some(&parent), Some(slide_id), Some(payload));
            enqueue(tx, queued, at)
        }
        Mutation::DeleteBlock { id } => {
            require_id(id)?;
            let (slide_id, presentation_id) = match block_parents(tx, id)? {
                Some((slide_id, presentation_id)) => (Some(slide_id), presentation_id),
                None => (None, None),
            };
            tx.execute("DELETE FROM blocks WHERE id = ?1", params![id])?;
            if let Some(presentation_id) = &presentation_id {
                touch_presentation(tx, presentation_id, at)?;
            }
            let queued =
                change(OperationKind::Delete, EntityKind::Block, id, presentation_id.as_deref(), slide_id.as_deref(), None);
            enqueue(tx, queued, at)
        }
    }
}

impl LocalStore {
    /// Apply local edits together with their pending changes.
    ///
    /// Every mutation writes its document change and exactly one queue entry
    /// inside one transaction. If any mutation fails (missing parent, empty
    /// id) nothing is written. Returns the number of changes enqueued.
    pub async fn apply(&self, mutations: Vec<Mutation>, at: i64) -> Result<usize, Error> {
        let count = self
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                for mutation in &mutations {
                    apply_one(&tx, mutation, at)?;
                }
                tx.commit()?;
                Ok(mutations.len())
            })
            .await
            .map_err(Error::from)?;
        tracing::debug!(changes = count, "applied local mutations");
        Ok(count)
    }

    /// Get a presentation by id.
    pub async fn get_presentation(&self, id: &str) -> Result<Option<PresentationRecord>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<PresentationRecord>, Error> {
                let sql = format!("SELECT {PRESENTATION_COLUMNS} FROM presentations WHERE id = ?1");
                Ok(conn.query_row(&sql, params![id], presentation_from_row).optional()?)
            })
            .await
            .map_err(Error::from)
    }

    /// All presentations, most recently modified first.
    pub async fn list_presentations(&self) -> Result<Vec<PresentationRecord>, Error> {
        self.query_presentations("ORDER BY last_modified DESC, id").await
    }

    /// Presentations with local changes not yet confirmed remotely.
    pub async fn unsynced_presentations(&self) -> Result<Vec<PresentationRecord>, Error> {
        self.query_presentations("WHERE synced = 0 ORDER BY last_modified ASC, id").await
    }

    async fn query_presentations(&self, clause: &'static str) -> Result<Vec<PresentationRecord>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<PresentationRecord>, Error> {
                let mut stmt = conn.prepare(&format!("SELECT {PRESENTATION_COLUMNS} FROM presentations {clause}"))?;
                let rows = stmt.query_map([], presentation_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn get_slide(&self, id: &str) -> Result<Option<SlideRecord>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<SlideRecord>, Error> {
                let sql = format!("SELECT {SLIDE_COLUMNS} FROM slides WHERE id = ?1");
                Ok(conn.query_row(&sql, params![id], slide_from_row).optional()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Slides of a presentation, in position order.
    pub async fn slides_for_presentation(&self, presentation_id: &str) -> Result<Vec<SlideRecord>, Error> {
        let presentation_id = presentation_id.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<SlideRecord>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SLIDE_COLUMNS} FROM slides WHERE presentation_id = ?1 ORDER BY position, id"
                ))?;
                let rows = stmt.query_map(params![presentation_id], slide_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn get_block(&self, id: &str) -> Result<Option<BlockRecord>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<BlockRecord>, Error> {
                let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id = ?1");
                Ok(conn.query_row(&sql, params![id], block_from_row).optional()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Blocks of a slide, in position order.
    pub async fn blocks_for_slide(&self, slide_id: &str) -> Result<Vec<BlockRecord>, Error> {
        let slide_id = slide_id.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<BlockRecord>, Error> {
                let mut stmt =
                    conn.prepare(&format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE slide_id = ?1 ORDER BY position, id"))?;
                let rows = stmt.query_map(params![slide_id], block_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Store a presentation tree fetched from the remote store.
    ///
    /// The tree is written as synced and no change is enqueued. A local copy
    /// with unsynced edits is left untouched; returns whether the tree was
    /// written.
    pub async fn cache_remote_presentation(
        &self, presentation: PresentationRecord, slides: Vec<SlideRecord>, blocks: Vec<BlockRecord>,
    ) -> Result<bool, Error> {
        require_id(&presentation.id)?;
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                let dirty: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM presentations WHERE id = ?1 AND synced = 0)",
                    params![presentation.id],
                    |row| row.get(0),
                )?;
                if dirty {
                    return Ok(false);
                }

                tx.execute(
                    "DELETE FROM blocks WHERE slide_id IN (SELECT id FROM slides WHERE presentation_id = ?1)",
                    params![presentation.id],
                )?;
                tx.execute("DELETE FROM slides WHERE presentation_id = ?1", params![presentation.id])?;
                tx.execute(
                    "INSERT INTO presentations (id, project_id, payload, last_modified, synced)
                     VALUES (?1, ?2, ?3, ?4, 1)
                     ON CONFLICT(id) DO UPDATE SET
                        project_id = excluded.project_id,
                        payload = excluded.payload,
                        last_modified = excluded.last_modified,
                        synced = 1",
                    params![presentation.id, presentation.project_id, presentation.payload, presentation.last_modified],
                )?;
                for slide in &slides {
                    tx.execute(
                        "INSERT OR REPLACE INTO slides (id, presentation_id, position, payload, last_modified)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![slide.id, presentation.id, slide.position, slide.payload, slide.last_modified],
                    )?;
                }
                for block in &blocks {
                    tx.execute(
                        "INSERT OR REPLACE INTO blocks (id, slide_id, position, payload, last_modified)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![block.id, block.slide_id, block.position, block.payload, block.last_modified],
                    )?;
                }
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(Error::from)
    }

    /// Overwrite a presentation with the remote copy and mark it synced.
    ///
    /// Returns false if the presentation no longer exists locally.
    pub async fn adopt_remote(&self, id: &str, payload: Payload, last_modified: i64) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let updated = conn.execute(
                    "UPDATE presentations SET payload = ?2, last_modified = ?3, synced = 1 WHERE id = ?1",
                    params![id, payload, last_modified],
                )?;
                Ok(updated > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Mark a presentation synced when no pending change references it or
    /// any of its children.
    pub async fn mark_synced(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let updated = conn.execute(
                    "UPDATE presentations SET synced = 1
                     WHERE id = ?1
                     AND NOT EXISTS(SELECT 1 FROM pending_changes WHERE presentation_id = ?1)",
                    params![id],
                )?;
                Ok(updated > 0)
            })
            .await
            .map_err(Error::from)
    }
}
