//! Background sync: periodic passes, reconnect triggers and asset sweeps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use offdeck_core::{AppConfig, CacheTier, CacheTiers, Error, LocalStore, now_millis};

use super::engine::SyncEngine;
use super::status::SyncStatus;
use crate::messaging::{InstanceBus, InstanceMessage};

/// Connectivity change reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// Timing for the background loop.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub sync_interval: Duration,
    pub sweep_interval: Duration,
    pub asset_retention: chrono::Duration,
    /// Entries kept per cache tier by the sweep.
    pub max_cache_entries: usize,
    /// Mirrored assets kept by the sweep.
    pub max_assets: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(3600),
            asset_retention: chrono::Duration::days(7),
            max_cache_entries: 500,
            max_assets: 1000,
        }
    }
}

impl ScheduleConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            sync_interval: config.sync_interval(),
            sweep_interval: config.asset_sweep_interval(),
            asset_retention: config.asset_retention(),
            max_cache_entries: config.max_cache_entries,
            max_assets: config.max_assets,
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    connectivity: mpsc::Sender<Connectivity>,
    handle: JoinHandle<()>,
}

/// Owns the background task driving a [`SyncEngine`].
pub struct BackgroundSync {
    engine: Arc<SyncEngine>,
    store: LocalStore,
    tiers: CacheTiers,
    bus: InstanceBus,
    config: ScheduleConfig,
    running: Mutex<Option<Running>>,
}

impl BackgroundSync {
    pub fn new(
        engine: Arc<SyncEngine>, store: LocalStore, tiers: CacheTiers, bus: InstanceBus, config: ScheduleConfig,
    ) -> Self {
        Self { engine, store, tiers, bus, config, running: Mutex::new(None) }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    /// Spawn the background loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let Ok(mut running) = self.running.lock() else {
            return;
        };
        if running.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (connectivity, connectivity_rx) = mpsc::channel(8);
        let worker = Worker {
            engine: self.engine.clone(),
            store: self.store.clone(),
            tiers: self.tiers.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
        };
        let handle = tokio::spawn(worker.run(shutdown_rx, connectivity_rx));
        tracing::info!(interval_secs = self.config.sync_interval.as_secs(), "background sync started");
        *running = Some(Running { shutdown, connectivity, handle });
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.handle.await {
                tracing::warn!(error = %e, "background sync task ended abnormally");
            }
            tracing::info!("background sync stopped");
        }
    }

    /// Report a connectivity change.
    ///
    /// While the loop runs, the change is handled there (coming online
    /// triggers a pass). Otherwise only the engine state is updated.
    pub async fn notify(&self, change: Connectivity) {
        let sender = self
            .running
            .lock()
            .ok()
            .and_then(|r| r.as_ref().map(|running| running.connectivity.clone()));
        match sender {
            Some(sender) if sender.send(change).await.is_ok() => {}
            _ => self.engine.set_online(change == Connectivity::Online),
        }
    }
}

struct Worker {
    engine: Arc<SyncEngine>,
    store: LocalStore,
    tiers: CacheTiers,
    bus: InstanceBus,
    config: ScheduleConfig,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>, mut connectivity: mpsc::Receiver<Connectivity>) {
        let mut sync_tick = time::interval(self.config.sync_interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = time::interval(self.config.sweep_interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(change) = connectivity.recv() => self.on_connectivity(change).await,
                _ = sync_tick.tick() => {
                    if self.engine.is_online() && self.engine.status() == SyncStatus::Idle {
                        self.pass("interval").await;
                    }
                }
                _ = sweep_tick.tick() => self.sweep().await,
            }
        }
    }

    async fn on_connectivity(&self, change: Connectivity) {
        match change {
            Connectivity::Online => {
                self.engine.set_online(true);
                self.bus.publish(InstanceMessage::SyncRequired);
                self.pass("reconnect").await;
            }
            Connectivity::Offline => self.engine.set_online(false),
        }
    }

    async fn pass(&self, trigger: &str) {
        match self.engine.run_pass().await {
            Ok(report) => tracing::debug!(trigger, pushed = report.pushed, failed = report.failed, "background pass"),
            Err(Error::SyncInProgress | Error::Offline) => {}
            Err(e) => tracing::warn!(trigger, error = %e, "background pass failed"),
        }
    }

    /// Age out stale assets, then trim the mirror and every cache tier to
    /// their size limits, least recently used first.
    async fn sweep(&self) {
        let cutoff = now_millis() - self.config.asset_retention.num_milliseconds();
        match self.store.sweep_assets(cutoff).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "background asset sweep"),
            Err(e) => tracing::warn!(error = %e, "asset sweep failed"),
        }

        match self.store.purge_lru_assets(self.config.max_assets).await {
            Ok(0) => {}
            Ok(evicted) => tracing::info!(evicted, max = self.config.max_assets, "asset mirror trimmed"),
            Err(e) => tracing::warn!(error = %e, "asset trim failed"),
        }

        for tier in CacheTier::ALL {
            match self.tiers.purge_lru(tier, self.config.max_cache_entries).await {
                Ok(0) => {}
                Ok(evicted) => tracing::info!(tier = tier.as_str(), evicted, "cache tier trimmed"),
                Err(e) => tracing::warn!(tier = tier.as_str(), error = %e, "cache trim failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::engine::SyncConfig;
    use crate::testing::{FakeRemote, set_sync_meta_writable};
    use offdeck_core::store::{Collection, Mutation};
    use offdeck_core::{CacheDb, CachedResponse, Payload};

    async fn scheduler_for(store: LocalStore, config: ScheduleConfig) -> (BackgroundSync, Arc<SyncEngine>, InstanceBus) {
        let engine = Arc::new(SyncEngine::new(store.clone(), Arc::new(FakeRemote::default()), SyncConfig::default()));
        let tiers = CacheTiers::new(CacheDb::open_in_memory().await.unwrap(), "v1");
        let bus = InstanceBus::new();
        let scheduler = BackgroundSync::new(engine.clone(), store, tiers, bus.clone(), config);
        (scheduler, engine, bus)
    }

    async fn setup(interval: Duration) -> (BackgroundSync, Arc<SyncEngine>, LocalStore, InstanceBus) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let config = ScheduleConfig { sync_interval: interval, ..Default::default() };
        let (scheduler, engine, bus) = scheduler_for(store.clone(), config).await;
        (scheduler, engine, store, bus)
    }

    async fn queue_one(store: &LocalStore) {
        let mutation = Mutation::PutPresentation {
            id: "p1".into(),
            project_id: None,
            payload: Payload::Json(serde_json::json!({"title": "Roadmap"})),
        };
        store.apply(vec![mutation], 100).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_triggers_pass_and_broadcast() {
        let (scheduler, engine, store, bus) = setup(Duration::from_secs(3600)).await;
        let mut instances = bus.subscribe();
        scheduler.notify(Connectivity::Offline).await;
        assert_eq!(engine.status(), SyncStatus::Offline);

        queue_one(&store).await;
        scheduler.start();
        scheduler.notify(Connectivity::Online).await;

        assert_eq!(instances.recv().await.unwrap(), InstanceMessage::SyncRequired);
        for _ in 0..100 {
            if store.pending_count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.pending_count().await.unwrap(), 0);
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (scheduler, _engine, _store, _bus) = setup(Duration::from_secs(3600)).await;
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_interval_drains_queue() {
        let (scheduler, _engine, store, _bus) = setup(Duration::from_millis(20)).await;
        queue_one(&store).await;
        scheduler.start();
        for _ in 0..100 {
            if store.pending_count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.pending_count().await.unwrap(), 0);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_notify_without_loop_updates_engine() {
        let (scheduler, engine, _store, _bus) = setup(Duration::from_secs(3600)).await;
        scheduler.notify(Connectivity::Offline).await;
        assert!(!engine.is_online());
        scheduler.notify(Connectivity::Online).await;
        assert!(engine.is_online());
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_sweep_trims_mirror_and_tiers_to_limits() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(CacheDb::open_in_memory().await.unwrap(), "v1");
        let engine = Arc::new(SyncEngine::new(store.clone(), Arc::new(FakeRemote::default()), SyncConfig::default()));
        let worker = Worker {
            engine,
            store: store.clone(),
            tiers: tiers.clone(),
            bus: InstanceBus::new(),
            config: ScheduleConfig { max_cache_entries: 2, max_assets: 2, ..Default::default() },
        };

        for name in ["a", "b", "c"] {
            store.put_asset(&format!("https://cdn.example.com/{name}.png"), vec![0], None).await.unwrap();
            let url = format!("https://app.test/api/themes/{name}");
            tiers.put(CacheTier::Api, &CachedResponse::new(url, 200, None, b"{}".to_vec())).await.unwrap();
        }
        tiers
            .put(CacheTier::Static, &CachedResponse::new("https://app.test/", 200, None, b"<html>".to_vec()))
            .await
            .unwrap();

        worker.sweep().await;

        assert_eq!(store.count(Collection::Assets).await.unwrap(), 2);
        assert_eq!(tiers.keys(CacheTier::Api).await.unwrap().len(), 2);
        assert_eq!(tiers.keys(CacheTier::Static).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_recovers_from_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offdeck.sqlite");
        let store = LocalStore::open(&path).await.unwrap();
        let config = ScheduleConfig { sync_interval: Duration::from_secs(3600), ..Default::default() };
        let (scheduler, engine, _bus) = scheduler_for(store.clone(), config).await;

        set_sync_meta_writable(&path, false).await;
        assert!(engine.run_pass().await.is_err());
        assert_eq!(engine.status(), SyncStatus::Error);

        set_sync_meta_writable(&path, true).await;
        queue_one(&store).await;
        let mut status = engine.subscribe_status();
        scheduler.start();
        scheduler.notify(Connectivity::Online).await;

        let settled = tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.status == SyncStatus::Idle))
            .await
            .is_ok_and(|seen| seen.is_ok());
        assert!(settled);
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.last_sync_at().await.unwrap().is_some());
        scheduler.stop().await;
    }
}
