//! Shared vocabulary for documents, mutations and sync policy.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Kind of document entity tracked by the change queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Presentation,
    Slide,
    Block,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Presentation => "presentation",
            EntityKind::Slide => "slide",
            EntityKind::Block => "block",
        }
    }

    /// Remote collection path segment (`presentations`, `slides`, `blocks`).
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Presentation => "presentations",
            EntityKind::Slide => "slides",
            EntityKind::Block => "blocks",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "presentation" => Ok(EntityKind::Presentation),
            "slide" => Ok(EntityKind::Slide),
            "block" => Ok(EntityKind::Block),
            other => Err(Error::Serialization(format!("unknown entity kind: {other}"))),
        }
    }
}

/// Mutation verb recorded on a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(Error::Serialization(format!("unknown operation kind: {other}"))),
        }
    }
}

/// Caller-owned document content.
///
/// The storage engine never looks inside a payload; it is serialized to
/// bytes on write and handed back unchanged on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// Structured document tree.
    Json(serde_json::Value),
    /// Pre-encoded content the caller serializes itself.
    Binary(Vec<u8>),
    /// No content (deletes carry no payload).
    Empty,
}

impl Payload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// JSON representation sent to the remote store.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Payload::Json(value) => value.clone(),
            Payload::Binary(bytes) => serde_json::json!({ "binary": hex::encode(bytes) }),
            Payload::Empty => serde_json::Value::Null,
        }
    }
}

/// Policy choosing the winner when both replicas changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Always keep the local copy.
    Local,
    /// Always adopt the remote copy.
    Remote,
    /// Last writer wins by timestamp; ties keep local.
    #[default]
    Merge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip_names() {
        for kind in [EntityKind::Presentation, EntityKind::Slide, EntityKind::Block] {
            assert_eq!(EntityKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(EntityKind::Slide.collection(), "slides");
        assert!(EntityKind::parse("theme").is_err());
    }

    #[test]
    fn test_operation_kind_parse() {
        assert_eq!(OperationKind::parse("delete").unwrap(), OperationKind::Delete);
        assert!(OperationKind::parse("upsert").is_err());
    }

    #[test]
    fn test_payload_bytes_preserve_tag() {
        let payload = Payload::Json(serde_json::json!({"title": "Q3 review", "theme": "dark"}));
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(Payload::from_bytes(&bytes).unwrap(), payload);

        let encoded = String::from_utf8(bytes).unwrap();
        assert!(encoded.contains(r#""kind":"json""#));
    }

    #[test]
    fn test_binary_payload_to_json() {
        let payload = Payload::Binary(vec![0xde, 0xad]);
        assert_eq!(payload.to_json(), serde_json::json!({"binary": "dead"}));
        assert_eq!(Payload::Empty.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_conflict_strategy_default() {
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::Merge);
        let parsed: ConflictStrategy = serde_json::from_str(r#""remote""#).unwrap();
        assert_eq!(parsed, ConflictStrategy::Remote);
    }
}
