//! Sync pass: drain the pending change queue, then reconcile unsynced
//! presentations with the remote store.
//!
//! ### Drain
//! - Global FIFO over the queue
//! - A change whose retry count already exceeds `max_retries` is dropped
//!   without dispatch and reported on the event channel
//! - A failure increments the retry count and blocks later changes for the
//!   same entity until the next pass, so one entity is never applied out of
//!   order
//! - The block extends to descendants: a slide waits on its presentation and
//!   a block waits on its slide and presentation. A held-back change blocks
//!   its own descendants in turn
//!
//! ### Reconcile
//! - For each presentation with `synced = false` and an empty queue, fetch the
//!   remote copy
//! - Remote strictly newer: conflict, settled by the configured strategy
//! - Otherwise push local and mark synced

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};

use offdeck_core::store::{PendingChange, PresentationRecord};
use offdeck_core::{AppConfig, ConflictStrategy, EntityKind, Error, LocalStore, OperationKind, Payload, now_millis};

use super::conflict::{Resolution, resolve};
use super::status::{StatusPublisher, SyncState, SyncStatus};
use crate::remote::RemoteStore;

const EVENT_CAPACITY: usize = 64;

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_retries: 5, conflict_strategy: ConflictStrategy::Merge }
    }
}

impl SyncConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self { max_retries: config.max_retries, conflict_strategy: config.conflict_strategy }
    }
}

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SyncReport {
    /// Changes and presentations accepted by the remote store.
    pub pushed: usize,
    pub failed: usize,
    /// Changes abandoned after exceeding the retry bound.
    pub dropped: usize,
    /// Changes held back because an earlier change for the same entity, or
    /// for one of its ancestors, failed.
    pub deferred: usize,
    pub conflicts: usize,
    /// Conflicts settled by adopting the remote copy.
    pub adopted: usize,
}

/// Notifications that are not part of the status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    ChangeDropped {
        change_id: i64,
        operation: OperationKind,
        entity_kind: EntityKind,
        entity_id: String,
        retry_count: u32,
        last_error: Option<String>,
    },
    ConflictResolved {
        presentation_id: String,
        resolution: Resolution,
        local_modified: i64,
        remote_modified: i64,
    },
    PassCompleted(SyncReport),
}

/// Resets the reentrancy flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the change queue against a remote store.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    status: StatusPublisher,
    events: broadcast::Sender<SyncEvent>,
    running: AtomicBool,
    online: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            remote,
            config,
            status: StatusPublisher::new(),
            events,
            running: AtomicBool::new(false),
            online: AtomicBool::new(true),
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncState> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.status.current()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.status()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Record a connectivity change.
    ///
    /// Going offline forces `offline` from any state. Coming back online
    /// returns to `idle`; the caller decides whether to start a pass.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::AcqRel);
        if online {
            self.status.transition(SyncStatus::Offline, SyncStatus::Idle);
            if !was {
                tracing::info!("connectivity restored");
            }
        } else {
            self.status.set_status(SyncStatus::Offline);
            if was {
                tracing::info!("connectivity lost");
            }
        }
    }

    /// Run one sync pass.
    ///
    /// # Errors
    ///
    /// - `Offline` when connectivity is down
    /// - `SyncInProgress` when another pass is running
    /// - any Local Store failure, which also moves the status to `error`
    pub async fn run_pass(&self) -> Result<SyncReport, Error> {
        if !self.is_online() {
            return Err(Error::Offline);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SyncInProgress);
        }
        let _guard = PassGuard(&self.running);

        self.status.set_status(SyncStatus::Syncing);
        self.status.update_progress(|p| *p = Default::default());

        let outcome = match self.pass().await {
            Ok(report) if report.failed == 0 => self.store.set_last_sync_at(now_millis()).await.map(|()| report),
            other => other,
        };

        match outcome {
            Ok(report) => {
                self.status.update_progress(|p| p.current_item = None);
                self.status
                    .set_status(if self.is_online() { SyncStatus::Idle } else { SyncStatus::Offline });
                tracing::info!(
                    pushed = report.pushed,
                    failed = report.failed,
                    dropped = report.dropped,
                    deferred = report.deferred,
                    conflicts = report.conflicts,
                    "sync pass completed"
                );
                let _ = self.events.send(SyncEvent::PassCompleted(report.clone()));
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "sync pass failed");
                self.status.set_status(SyncStatus::Error);
                Err(e)
            }
        }
    }

    async fn pass(&self) -> Result<SyncReport, Error> {
        let mut report = SyncReport::default();

        let changes = self.store.pending_changes().await?;
        self.status.update_progress(|p| p.total = changes.len());

        let mut blocked: HashSet<(EntityKind, String)> = HashSet::new();
        for change in changes {
            let label = format!("{} {} {}", change.operation.as_str(), change.entity_kind.as_str(), change.entity_id);
            self.status.update_progress(|p| p.current_item = Some(label));

            if change.retry_count > self.config.max_retries {
                self.drop_change(&change).await?;
                report.dropped += 1;
                self.status.update_progress(|p| p.failed += 1);
                continue;
            }

            let key = (change.entity_kind, change.entity_id.clone());
            if barrier_keys(&change).iter().any(|k| blocked.contains(k)) {
                blocked.insert(key);
                report.deferred += 1;
                continue;
            }

            match self.dispatch(&change).await {
                Ok(()) => {
                    self.store.complete_change(change.id).await?;
                    report.pushed += 1;
                    self.status.update_progress(|p| p.completed += 1);
                }
                Err(e) => {
                    let retries = self.store.record_failure(change.id, &e.to_string()).await?;
                    tracing::debug!(
                        change_id = change.id,
                        entity = %change.entity_id,
                        retries,
                        error = %e,
                        "pending change failed"
                    );
                    blocked.insert(key);
                    report.failed += 1;
                    self.status.update_progress(|p| p.failed += 1);
                }
            }
        }

        let unsynced = self.store.unsynced_presentations().await?;
        self.status.update_progress(|p| p.total += unsynced.len());
        for presentation in unsynced {
            self.status
                .update_progress(|p| p.current_item = Some(format!("reconcile presentation {}", presentation.id)));
            if self.store.pending_count_for_presentation(&presentation.id).await? > 0 {
                continue;
            }
            match self.reconcile(&presentation, &mut report).await {
                Ok(()) => self.status.update_progress(|p| p.completed += 1),
                Err(e) if e.is_transient() => {
                    tracing::debug!(presentation = %presentation.id, error = %e, "reconcile failed");
                    report.failed += 1;
                    self.status.update_progress(|p| p.failed += 1);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    async fn dispatch(&self, change: &PendingChange) -> Result<(), Error> {
        tracing::debug!(
            change_id = change.id,
            operation = change.operation.as_str(),
            kind = change.entity_kind.as_str(),
            entity = %change.entity_id,
            "dispatching pending change"
        );
        match change.operation {
            OperationKind::Create => {
                self.remote
                    .create(change.entity_kind, &change.entity_id, &change_body(change))
                    .await
            }
            OperationKind::Update => {
                self.remote
                    .update(change.entity_kind, &change.entity_id, &change_body(change))
                    .await
            }
            OperationKind::Delete => self.remote.delete(change.entity_kind, &change.entity_id).await,
        }
    }

    async fn drop_change(&self, change: &PendingChange) -> Result<(), Error> {
        self.store.remove_change(change.id).await?;
        tracing::warn!(
            change_id = change.id,
            operation = change.operation.as_str(),
            kind = change.entity_kind.as_str(),
            entity = %change.entity_id,
            retries = change.retry_count,
            last_error = change.last_error.as_deref().unwrap_or(""),
            "pending change dropped after exceeding retry bound"
        );
        let _ = self.events.send(SyncEvent::ChangeDropped {
            change_id: change.id,
            operation: change.operation,
            entity_kind: change.entity_kind,
            entity_id: change.entity_id.clone(),
            retry_count: change.retry_count,
            last_error: change.last_error.clone(),
        });
        Ok(())
    }

    async fn reconcile(&self, local: &PresentationRecord, report: &mut SyncReport) -> Result<(), Error> {
        let remote = self.remote.fetch_presentation(&local.id).await?;

        if let Some(remote) = &remote
            && remote.last_modified > local.last_modified
        {
            report.conflicts += 1;
            let resolution = resolve(self.config.conflict_strategy, local.last_modified, remote.last_modified);
            tracing::info!(
                presentation = %local.id,
                local_modified = local.last_modified,
                remote_modified = remote.last_modified,
                ?resolution,
                "conflict resolved"
            );
            let _ = self.events.send(SyncEvent::ConflictResolved {
                presentation_id: local.id.clone(),
                resolution,
                local_modified: local.last_modified,
                remote_modified: remote.last_modified,
            });

            if resolution == Resolution::AdoptRemote {
                self.store
                    .adopt_remote(&local.id, Payload::Json(remote.payload.clone()), remote.last_modified)
                    .await?;
                report.adopted += 1;
                return Ok(());
            }
        }

        let body = presentation_body(local);
        match remote {
            Some(_) => self.remote.update(EntityKind::Presentation, &local.id, &body).await?,
            None => self.remote.create(EntityKind::Presentation, &local.id, &body).await?,
        }
        self.store.mark_synced(&local.id).await?;
        report.pushed += 1;
        Ok(())
    }
}

fn parent_key(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Presentation => "projectId",
        EntityKind::Slide => "presentationId",
        EntityKind::Block => "slideId",
    }
}

/// The change's own entity followed by the ancestors it depends on.
fn barrier_keys(change: &PendingChange) -> Vec<(EntityKind, String)> {
    let mut keys = vec![(change.entity_kind, change.entity_id.clone())];
    match change.entity_kind {
        EntityKind::Presentation => {}
        EntityKind::Slide => keys.extend(change.presentation_id.clone().map(|id| (EntityKind::Presentation, id))),
        EntityKind::Block => {
            keys.extend(change.parent_id.clone().map(|id| (EntityKind::Slide, id)));
            keys.extend(change.presentation_id.clone().map(|id| (EntityKind::Presentation, id)));
        }
    }
    keys
}

/// Request body for a queued create or update.
fn change_body(change: &PendingChange) -> Value {
    let mut body = json!({
        "id": change.entity_id,
        "payload": change.payload.as_ref().map(Payload::to_json).unwrap_or(Value::Null),
        "lastModified": change.enqueued_at,
    });
    if let (Some(parent), Some(map)) = (&change.parent_id, body.as_object_mut()) {
        map.insert(parent_key(change.entity_kind).to_string(), Value::String(parent.clone()));
    }
    body
}

fn presentation_body(record: &PresentationRecord) -> Value {
    json!({
        "id": record.id,
        "projectId": record.project_id,
        "payload": record.payload.to_json(),
        "lastModified": record.last_modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, RemoteCall, set_sync_meta_writable};
    use offdeck_core::store::{Mutation, NewChange};

    async fn engine_with(remote: Arc<FakeRemote>, strategy: ConflictStrategy) -> (SyncEngine, LocalStore) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let config = SyncConfig { max_retries: 5, conflict_strategy: strategy };
        (SyncEngine::new(store.clone(), remote, config), store)
    }

    fn put(id: &str, title: &str) -> Mutation {
        Mutation::PutPresentation { id: id.into(), project_id: None, payload: Payload::Json(json!({ "title": title })) }
    }

    #[tokio::test]
    async fn test_offline_mutations_apply_in_enqueue_order() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(remote.clone(), ConflictStrategy::Merge).await;
        engine.set_online(false);

        store.apply(vec![put("p1", "v1")], 100).await.unwrap();
        store.apply(vec![put("p1", "v2")], 200).await.unwrap();
        store.apply(vec![put("p1", "v3")], 300).await.unwrap();
        assert!(matches!(engine.run_pass().await, Err(Error::Offline)));

        engine.set_online(true);
        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.pushed, 4);
        assert_eq!(store.pending_count().await.unwrap(), 0);

        let titles: Vec<Value> = remote
            .calls()
            .iter()
            .take(3)
            .map(|call| match call {
                RemoteCall::Create(_, _, body) | RemoteCall::Update(_, _, body) => body["payload"]["title"].clone(),
                RemoteCall::Delete(..) => Value::Null,
            })
            .collect();
        assert_eq!(titles, vec![json!("v1"), json!("v2"), json!("v3")]);
        assert!(matches!(remote.calls()[0], RemoteCall::Create(..)));
        assert!(store.get_presentation("p1").await.unwrap().unwrap().synced);
        assert!(store.last_sync_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failure_defers_later_changes_for_same_entity() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(remote.clone(), ConflictStrategy::Merge).await;
        remote.fail_entity("p1");

        store.apply(vec![put("p1", "a"), put("p2", "b"), put("p1", "c")], 100).await.unwrap();
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(remote.calls().iter().filter(|c| c.entity_id() == "p1").count(), 0);
        assert_eq!(store.pending_count().await.unwrap(), 2);
        assert!(store.last_sync_at().await.unwrap().is_none());

        let queued = store.pending_changes().await.unwrap();
        assert_eq!(queued[0].retry_count, 1);
        assert_eq!(queued[1].retry_count, 0);

        remote.heal_entity("p1");
        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.failed, 0);
        let p1_calls: Vec<RemoteCall> = remote.calls().into_iter().filter(|c| c.entity_id() == "p1").collect();
        assert!(matches!(p1_calls[0], RemoteCall::Create(..)));
        assert!(matches!(p1_calls[1], RemoteCall::Update(..)));
    }

    #[tokio::test]
    async fn test_failed_presentation_holds_back_its_children() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(remote.clone(), ConflictStrategy::Merge).await;
        remote.fail_entity("p1");

        let slide = Mutation::PutSlide {
            id: "s1".into(),
            presentation_id: "p1".into(),
            position: 0,
            payload: Payload::Json(json!({"layout": "title"})),
        };
        let block = Mutation::PutBlock {
            id: "b1".into(),
            slide_id: "s1".into(),
            position: 0,
            payload: Payload::Json(json!({"text": "hello"})),
        };
        store.apply(vec![put("p1", "deck"), slide, block, put("p2", "other")], 100).await.unwrap();

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 2);
        assert!(remote.calls().iter().all(|c| c.entity_id() == "p2"));

        let queued = store.pending_changes().await.unwrap();
        let ids: Vec<&str> = queued.iter().map(|c| c.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "s1", "b1"]);
        assert_eq!(queued[1].retry_count, 0);
        assert_eq!(queued[2].retry_count, 0);

        remote.heal_entity("p1");
        engine.run_pass().await.unwrap();
        let order: Vec<String> = remote
            .calls()
            .into_iter()
            .filter(|c| c.entity_id() != "p2")
            .map(|c| c.entity_id().to_string())
            .collect();
        assert_eq!(order[..3], ["p1", "s1", "b1"]);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bookkeeping_failure_ends_in_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offdeck.sqlite");
        let store = LocalStore::open(&path).await.unwrap();
        let engine = SyncEngine::new(store.clone(), Arc::new(FakeRemote::default()), SyncConfig::default());
        set_sync_meta_writable(&path, false).await;

        assert!(engine.run_pass().await.is_err());
        assert_eq!(engine.status(), SyncStatus::Error);
        assert!(!engine.is_syncing());
        assert!(store.last_sync_at().await.unwrap().is_none());

        set_sync_meta_writable(&path, true).await;
        engine.run_pass().await.unwrap();
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert!(store.last_sync_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_change_over_retry_bound_is_dropped() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(remote.clone(), ConflictStrategy::Merge).await;
        let mut events = engine.subscribe_events();
        remote.fail_entity("s1");

        store
            .enqueue_change(NewChange {
                operation: OperationKind::Delete,
                entity_kind: EntityKind::Slide,
                entity_id: "s1".into(),
                presentation_id: None,
                parent_id: None,
                payload: None,
            })
            .await
            .unwrap();

        for _ in 0..6 {
            engine.run_pass().await.unwrap();
        }
        assert_eq!(store.pending_changes().await.unwrap()[0].retry_count, 6);

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);

        let dropped = loop {
            match events.recv().await.unwrap() {
                SyncEvent::ChangeDropped { entity_id, retry_count, .. } => break (entity_id, retry_count),
                _ => continue,
            }
        };
        assert_eq!(dropped, ("s1".to_string(), 6));

        engine.run_pass().await.unwrap();
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remote_newer_is_adopted() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(remote.clone(), ConflictStrategy::Merge).await;
        store.apply(vec![put("p1", "local")], 100).await.unwrap();
        let change = store.pending_changes().await.unwrap().remove(0);
        store.complete_change(change.id).await.unwrap();
        remote.put_document("p1", json!({"title": "remote"}), 200);

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.adopted, 1);

        let record = store.get_presentation("p1").await.unwrap().unwrap();
        assert_eq!(record.payload, Payload::Json(json!({"title": "remote"})));
        assert_eq!(record.last_modified, 200);
        assert!(record.synced);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_local_newer_is_pushed() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(remote.clone(), ConflictStrategy::Merge).await;
        store.apply(vec![put("p1", "local")], 300).await.unwrap();
        let change = store.pending_changes().await.unwrap().remove(0);
        store.complete_change(change.id).await.unwrap();
        remote.put_document("p1", json!({"title": "remote"}), 200);

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.conflicts, 0);
        assert_eq!(report.pushed, 1);
        assert!(matches!(&remote.calls()[0], RemoteCall::Update(EntityKind::Presentation, id, _) if id == "p1"));
        assert!(store.get_presentation("p1").await.unwrap().unwrap().synced);
    }

    #[tokio::test]
    async fn test_local_strategy_keeps_local_on_conflict() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(remote.clone(), ConflictStrategy::Local).await;
        store.apply(vec![put("p1", "local")], 100).await.unwrap();
        let change = store.pending_changes().await.unwrap().remove(0);
        store.complete_change(change.id).await.unwrap();
        remote.put_document("p1", json!({"title": "remote"}), 200);

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.adopted, 0);
        assert_eq!(remote.documents.lock().unwrap()["p1"].payload, json!({"title": "local"}));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, _store) = engine_with(remote.clone(), ConflictStrategy::Merge).await;
        assert_eq!(engine.status(), SyncStatus::Idle);

        engine.set_online(false);
        assert_eq!(engine.status(), SyncStatus::Offline);
        engine.set_online(true);
        assert_eq!(engine.status(), SyncStatus::Idle);

        engine.run_pass().await.unwrap();
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_no_overlapping_passes() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, _store) = engine_with(remote, ConflictStrategy::Merge).await;

        engine.running.store(true, Ordering::SeqCst);
        assert!(matches!(engine.run_pass().await, Err(Error::SyncInProgress)));
        engine.running.store(false, Ordering::SeqCst);
        assert!(engine.run_pass().await.is_ok());
    }

    #[test]
    fn test_change_body_parent_key() {
        let change = PendingChange {
            id: 1,
            operation: OperationKind::Create,
            entity_kind: EntityKind::Block,
            entity_id: "b1".into(),
            presentation_id: Some("p1".into()),
            parent_id: Some("s1".into()),
            payload: Some(Payload::Json(json!({"text": "hi"}))),
            enqueued_at: 42,
            retry_count: 0,
            last_error: None,
        };
        let body = change_body(&change);
        assert_eq!(body["slideId"], json!("s1"));
        assert_eq!(body["payload"], json!({"text": "hi"}));
        assert_eq!(body["lastModified"], json!(42));
    }
}
