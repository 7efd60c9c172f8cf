//! Conflict resolution between the local and remote copy of a presentation.

use offdeck_core::ConflictStrategy;
use serde::{Deserialize, Serialize};

/// Which copy survives a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    AdoptRemote,
}

/// Pick the winner for a presentation modified on both replicas.
///
/// `Merge` is last-writer-wins on wall-clock milliseconds: the remote copy
/// wins only when strictly newer, ties keep local. No field-level merge.
pub fn resolve(strategy: ConflictStrategy, local_modified: i64, remote_modified: i64) -> Resolution {
    match strategy {
        ConflictStrategy::Local => Resolution::KeepLocal,
        ConflictStrategy::Remote => Resolution::AdoptRemote,
        ConflictStrategy::Merge if remote_modified > local_modified => Resolution::AdoptRemote,
        ConflictStrategy::Merge => Resolution::KeepLocal,
    }
}
