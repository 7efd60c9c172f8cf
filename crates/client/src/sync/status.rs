//! Sync status stream.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Sync engine state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
    Offline,
}

/// Progress of the current (or last) pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SyncProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub current_item: Option<String>,
}

/// One observation of the status stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SyncState {
    pub status: SyncStatus,
    pub progress: SyncProgress,
}

/// Publishes `(status, progress)` to any number of watchers.
///
/// Watchers only see the latest value; intermediate progress may be skipped
/// by slow readers.
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<SyncState>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SyncState::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.tx.borrow().status
    }

    pub fn set_status(&self, status: SyncStatus) {
        self.tx.send_if_modified(|state| {
            if state.status == status {
                return false;
            }
            tracing::debug!(from = ?state.status, to = ?status, "sync status");
            state.status = status;
            true
        });
    }

    /// Move to `to` only if the current status is `from`.
    pub fn transition(&self, from: SyncStatus, to: SyncStatus) -> bool {
        self.tx.send_if_modified(|state| {
            if state.status != from {
                return false;
            }
            state.status = to;
            true
        })
    }

    pub fn update_progress(&self, update: impl FnOnce(&mut SyncProgress)) {
        self.tx.send_modify(|state| update(&mut state.progress));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watchers_see_latest() {
        let publisher = StatusPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.set_status(SyncStatus::Syncing);
        publisher.update_progress(|p| {
            p.total = 3;
            p.current_item = Some("create presentation p1".into());
        });

        rx.changed().await.unwrap();
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.status, SyncStatus::Syncing);
        assert_eq!(state.progress.total, 3);
    }

    #[test]
    fn test_transition_is_conditional() {
        let publisher = StatusPublisher::new();
        assert!(!publisher.transition(SyncStatus::Offline, SyncStatus::Idle));
        publisher.set_status(SyncStatus::Offline);
        assert!(publisher.transition(SyncStatus::Offline, SyncStatus::Idle));
        assert_eq!(publisher.status(), SyncStatus::Idle);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SyncStatus::Offline).unwrap(), r#""offline""#);
    }
}
