//! Core types and shared functionality for offdeck.
//!
//! This crate provides:
//! - The Local Store (documents, pending change queue, asset mirror, reference caches)
//! - Cache tiers with a SQLite backend
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod migrations;
pub mod model;
pub mod store;

pub use cache::{CacheDb, CacheTier, CacheTiers, CachedResponse};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use model::{ConflictStrategy, EntityKind, OperationKind, Payload, now_millis};
pub use store::LocalStore;
