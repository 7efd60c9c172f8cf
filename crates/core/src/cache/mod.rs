//! SQLite-backed cache tiers for intercepted responses.
//!
//! This module provides named response caches using SQLite with async
//! access via tokio-rusqlite. It supports:
//!
//! - Three content-class tiers (assets, API, static shell) sharing one version tag
//! - Deploy-time invalidation by purging caches of other versions
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - LRU trimming per cache

pub mod connection;
pub mod entries;
pub mod tiers;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::CachedResponse;
pub use tiers::{CacheTier, CacheTiers};
