//! Local Store: durable, transactional storage for documents, the pending
//! change queue, the asset mirror and reference caches.
//!
//! Backed by SQLite through tokio-rusqlite. Each public operation runs in a
//! single `call` on the connection thread, so writes commit atomically or not
//! at all, and operations from one caller are observed in program order.

pub mod assets;
pub mod connection;
pub mod documents;
pub mod hash;
pub mod pending;
pub mod records;
pub mod reference;

pub use connection::LocalStore;
pub use hash::asset_id;
pub use records::{
    AssetRecord, BlockRecord, Collection, Mutation, NewChange, PendingChange, PresentationRecord, ReferenceKind,
    ReferenceRecord, SlideRecord,
};
