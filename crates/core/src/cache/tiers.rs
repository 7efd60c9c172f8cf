//! The three versioned cache tiers.

use super::connection::CacheDb;
use super::entries::CachedResponse;
use crate::Error;
use serde::{Deserialize, Serialize};

const CACHE_PREFIX: &str = "offdeck";

/// Content class served from its own cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Binary assets (images, fonts).
    Assets,
    /// Read-only API responses.
    Api,
    /// Application shell and navigation pages.
    Static,
}

impl CacheTier {
    pub const ALL: [CacheTier; 3] = [CacheTier::Assets, CacheTier::Api, CacheTier::Static];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Assets => "assets",
            CacheTier::Api => "api",
            CacheTier::Static => "static",
        }
    }

    /// Cache name for this tier under a version tag: `offdeck-{tier}-{version}`.
    pub fn cache_name(&self, version: &str) -> String {
        format!("{CACHE_PREFIX}-{}-{version}", self.as_str())
    }
}

/// Versioned view over the cache database.
///
/// Every tier shares one version tag. Activation deletes any cache whose
/// name does not belong to the current version.
#[derive(Clone, Debug)]
pub struct CacheTiers {
    db: CacheDb,
    version: String,
}

impl CacheTiers {
    pub fn new(db: CacheDb, version: impl Into<String>) -> Self {
        Self { db, version: version.into() }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self, tier: CacheTier) -> String {
        tier.cache_name(&self.version)
    }

    pub async fn match_url(&self, tier: CacheTier, url: &str) -> Result<Option<CachedResponse>, Error> {
        self.db.match_url(&self.name(tier), url).await
    }

    pub async fn put(&self, tier: CacheTier, response: &CachedResponse) -> Result<(), Error> {
        self.db.put(&self.name(tier), response).await
    }

    pub async fn delete(&self, tier: CacheTier, url: &str) -> Result<bool, Error> {
        self.db.delete(&self.name(tier), url).await
    }

    pub async fn keys(&self, tier: CacheTier) -> Result<Vec<String>, Error> {
        self.db.keys(&self.name(tier)).await
    }

    pub async fn purge_lru(&self, tier: CacheTier, max_entries: usize) -> Result<u64, Error> {
        self.db.purge_lru(&self.name(tier), max_entries).await
    }

    /// Open the current version's caches and delete every other cache.
    ///
    /// Returns the names of the purged caches.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        let current: Vec<String> = CacheTier::ALL.iter().map(|tier| self.name(*tier)).collect();
        for name in &current {
            self.db.open_cache(name).await?;
        }

        let mut purged = Vec::new();
        for name in self.db.cache_names().await? {
            if !current.contains(&name) && self.db.delete_cache(&name).await? {
                purged.push(name);
            }
        }

        tracing::info!(version = %self.version, purged = purged.len(), "cache tiers activated");
        Ok(purged)
    }

    /// Delete every cache, regardless of version. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, Error> {
        let mut removed = 0;
        for name in self.db.cache_names().await? {
            if self.db.delete_cache(&name).await? {
                removed += 1;
            }
        }
        tracing::info!(removed, "cache tiers cleared");
        Ok(removed)
    }
}
