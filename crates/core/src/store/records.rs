//! Typed record envelopes stored in the Local Store.

use serde::{Deserialize, Serialize};
use tokio_rusqlite::rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use tokio_rusqlite::rusqlite;

use crate::model::{EntityKind, OperationKind, Payload};

/// A presentation document and its sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PresentationRecord {
    pub id: String,
    pub project_id: Option<String>,
    pub payload: Payload,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub synced: bool,
}

/// A slide, indexed by its presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SlideRecord {
    pub id: String,
    pub presentation_id: String,
    pub position: i64,
    pub payload: Payload,
    pub last_modified: i64,
}

/// A content block, indexed by its slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BlockRecord {
    pub id: String,
    pub slide_id: String,
    pub position: i64,
    pub payload: Payload,
    pub last_modified: i64,
}

/// A mirrored binary asset. `id` is derived from `source_url`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub id: String,
    pub source_url: String,
    pub blob: Vec<u8>,
    pub mime_type: Option<String>,
    pub last_accessed: i64,
    pub cached_at: i64,
}

/// A queued mutation awaiting application to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PendingChange {
    pub id: i64,
    pub operation: OperationKind,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    /// Presentation owning the entity, used for the synced-flag invariant.
    pub presentation_id: Option<String>,
    /// Direct parent: project for a presentation, presentation for a slide,
    /// slide for a block.
    pub parent_id: Option<String>,
    pub payload: Option<Payload>,
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// A change to enqueue outside of a document mutation.
#[derive(Debug, Clone)]
pub struct NewChange {
    pub operation: OperationKind,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub presentation_id: Option<String>,
    pub parent_id: Option<String>,
    pub payload: Option<Payload>,
}

/// Local edit applied atomically with its pending change.
///
/// `Put*` variants create the record when it does not exist and update it
/// otherwise; the queued operation kind follows.
#[derive(Debug, Clone)]
pub enum Mutation {
    PutPresentation { id: String, project_id: Option<String>, payload: Payload },
    DeletePresentation { id: String },
    PutSlide { id: String, presentation_id: String, position: i64, payload: Payload },
    DeleteSlide { id: String },
    PutBlock { id: String, slide_id: String, position: i64, payload: Payload },
    DeleteBlock { id: String },
}

/// Read-mostly reference entry (preference, template or theme).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ReferenceRecord {
    pub id: String,
    pub data: serde_json::Value,
    pub refreshed_at: i64,
}

/// Reference cache families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Preferences,
    Templates,
    Themes,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 3] = [ReferenceKind::Preferences, ReferenceKind::Templates, ReferenceKind::Themes];

    /// Collection name, also the remote API path segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Preferences => "preferences",
            ReferenceKind::Templates => "templates",
            ReferenceKind::Themes => "themes",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        self.as_str()
    }
}

/// Named collections of the Local Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Presentations,
    Slides,
    Blocks,
    Assets,
    PendingChanges,
    Preferences,
    Templates,
    Themes,
}

impl Collection {
    pub const ALL: [Collection; 8] = [
        Collection::Presentations,
        Collection::Slides,
        Collection::Blocks,
        Collection::Assets,
        Collection::PendingChanges,
        Collection::Preferences,
        Collection::Templates,
        Collection::Themes,
    ];

    pub(crate) fn table(&self) -> &'static str {
        match self {
            Collection::Presentations => "presentations",
            Collection::Slides => "slides",
            Collection::Blocks => "blocks",
            Collection::Assets => "assets",
            Collection::PendingChanges => "pending_changes",
            Collection::Preferences => "preferences",
            Collection::Templates => "templates",
            Collection::Themes => "themes",
        }
    }
}

impl ToSql for Payload {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let bytes = serde_json::to_vec(self).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(bytes))
    }
}

impl FromSql for Payload {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bytes = value.as_blob()?;
        serde_json::from_slice(bytes).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for EntityKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EntityKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        EntityKind::parse(value.as_str()?).map_err(|e| FromSqlError::Other(e.to_string().into()))
    }
}

impl ToSql for OperationKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for OperationKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        OperationKind::parse(value.as_str()?).map_err(|e| FromSqlError::Other(e.to_string().into()))
    }
}
