//! Deterministic asset identifiers.

use sha2::{Digest, Sha256};

/// Compute the asset id for a source URL.
///
/// The id depends only on the URL, so re-caching the same asset always
/// lands on the same record.
pub fn asset_id(source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"asset\n");
    hasher.update(source_url.trim().as_bytes());
    hex::encode(hasher.finalize())
}
