//! Client side of offdeck.
//!
//! This crate provides the HTTP fetch pipeline, the remote store client, the
//! sync engine with its background scheduler, the network interception layer,
//! instance messaging, and the storage facade that ties them together.

pub mod facade;
pub mod fetch;
pub mod intercept;
pub mod messaging;
pub mod remote;
pub mod sync;

#[cfg(test)]
mod testing;

pub use facade::{
    BlockDraft, PresentationDraft, PresentationTree, SlideDraft, SlideTree, StorageFacade, StorageStats, human_bytes,
};
pub use fetch::{FetchClient, FetchConfig, FetchResponse, Network};
pub use intercept::{
    CacheCommand, Classifier, CommandOutcome, InterceptRequest, InterceptedResponse, Interceptor, RequestClass,
    ResponseSource,
};
pub use messaging::{InstanceBus, InstanceMessage};
pub use remote::{HttpRemoteStore, RemoteDocument, RemoteProject, RemoteStore};
pub use sync::{
    BackgroundSync, Connectivity, Resolution, SyncConfig, SyncEngine, SyncEvent, SyncProgress, SyncReport, SyncState,
    SyncStatus,
};
