//! Change queue draining, conflict resolution and background scheduling.

pub mod conflict;
pub mod engine;
pub mod scheduler;
pub mod status;

pub use conflict::{Resolution, resolve};
pub use engine::{SyncConfig, SyncEngine, SyncEvent, SyncReport};
pub use scheduler::{BackgroundSync, Connectivity, ScheduleConfig};
pub use status::{StatusPublisher, SyncProgress, SyncState, SyncStatus};
