//! Storage facade: the single entry point for the editor.
//!
//! Reads come from the Local Store, asset and API traffic goes through the
//! interception layer, and every write is applied locally together with its
//! pending change. The facade is also the composition root that wires the
//! store, cache tiers, sync engine, scheduler and instance bus together.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use offdeck_core::store::{
    AssetRecord, BlockRecord, Collection, Mutation, PresentationRecord, ReferenceKind, ReferenceRecord, SlideRecord,
};
use offdeck_core::{AppConfig, CacheDb, CacheTiers, Error, LocalStore, Payload, now_millis};

use crate::fetch::{FetchClient, FetchConfig, Network, canonicalize, endpoint};
use crate::intercept::{
    CacheCommand, Classifier, CommandOutcome, InterceptRequest, InterceptedResponse, Interceptor, RequestClass,
    ResponseSource,
};
use crate::messaging::{InstanceBus, InstanceMessage};
use crate::remote::{HttpRemoteStore, RemotePresentation, RemoteStore};
use crate::sync::{
    BackgroundSync, Connectivity, ScheduleConfig, SyncConfig, SyncEngine, SyncEvent, SyncReport, SyncState, SyncStatus,
};

/// A presentation with its slides and blocks, as the editor sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PresentationDraft {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub payload: Payload,
    #[serde(default)]
    pub slides: Vec<SlideDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SlideDraft {
    pub id: String,
    pub position: i64,
    pub payload: Payload,
    #[serde(default)]
    pub blocks: Vec<BlockDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BlockDraft {
    pub id: String,
    pub position: i64,
    pub payload: Payload,
}

/// A stored presentation with its children in position order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PresentationTree {
    pub presentation: PresentationRecord,
    pub slides: Vec<SlideTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SlideTree {
    pub slide: SlideRecord,
    pub blocks: Vec<BlockRecord>,
}

/// Aggregate diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StorageStats {
    pub presentations: u64,
    pub slides: u64,
    pub blocks: u64,
    pub assets: u64,
    pub pending_changes: u64,
    pub estimated_bytes: u64,
    /// `estimated_bytes` formatted for display, e.g. `1.5 KB`.
    pub estimated_size: String,
    /// Milliseconds since the Unix epoch.
    pub last_sync_at: Option<i64>,
    pub last_sync: Option<String>,
    pub status: SyncStatus,
    pub online: bool,
    pub memory_only: bool,
    pub cache_version: String,
}

/// Format a byte count with binary units.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn iso_millis(ms: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

/// Single entry point over storage, caching and sync.
pub struct StorageFacade {
    config: AppConfig,
    store: LocalStore,
    engine: Arc<SyncEngine>,
    scheduler: BackgroundSync,
    interceptor: Interceptor,
    network: Arc<dyn Network>,
    remote: Arc<dyn RemoteStore>,
    bus: InstanceBus,
    memory_only: bool,
}

impl StorageFacade {
    /// Build the facade with the HTTP network and remote store.
    ///
    /// # Errors
    ///
    /// Fails when `api_token` is missing or the HTTP client cannot be built.
    pub async fn open(config: AppConfig) -> Result<Self, Error> {
        let network = FetchClient::new(FetchConfig::from_app(&config))?;
        let remote = HttpRemoteStore::from_config(&config)?;
        Self::open_with(config, Arc::new(remote), Arc::new(network)).await
    }

    /// Build the facade over explicit remote and network implementations.
    ///
    /// If the on-disk store or cache cannot be opened, an in-memory one is
    /// used instead and [`StorageStats::memory_only`] reports it. The shell is
    /// precached for the configured cache version and caches left by other
    /// versions are purged before the facade is returned.
    pub async fn open_with(
        config: AppConfig, remote: Arc<dyn RemoteStore>, network: Arc<dyn Network>,
    ) -> Result<Self, Error> {
        let mut memory_only = false;

        let store = match LocalStore::open(&config.db_path).await {
            Ok(store) => store,
            Err(Error::StorageUnavailable(reason)) => {
                tracing::warn!(path = %config.db_path.display(), %reason, "local store unavailable, using memory");
                memory_only = true;
                LocalStore::open_in_memory().await?
            }
            Err(e) => return Err(e),
        };
        let cache = match CacheDb::open(&config.cache_path).await {
            Ok(cache) => cache,
            Err(Error::StorageUnavailable(reason)) => {
                tracing::warn!(path = %config.cache_path.display(), %reason, "cache unavailable, using memory");
                memory_only = true;
                CacheDb::open_in_memory().await?
            }
            Err(e) => return Err(e),
        };

        let bus = InstanceBus::new();
        let tiers = CacheTiers::new(cache, config.cache_version.clone());
        let engine = Arc::new(SyncEngine::new(store.clone(), remote.clone(), SyncConfig::from_app(&config)));
        let scheduler = BackgroundSync::new(
            engine.clone(),
            store.clone(),
            tiers.clone(),
            bus.clone(),
            ScheduleConfig::from_app(&config),
        );

        let mut interceptor = Interceptor::new(
            tiers,
            network.clone(),
            Classifier::from_config(&config),
            bus.clone(),
        );
        if let Some(path) = &config.offline_page_path {
            match std::fs::read(path) {
                Ok(html) => interceptor = interceptor.with_offline_page(html),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "offline page unreadable, using bundled"),
            }
        }

        prepare_caches(&interceptor, &config).await;

        tracing::info!(
            db = %config.db_path.display(),
            cache_version = %config.cache_version,
            memory_only,
            "storage facade ready"
        );
        Ok(Self { config, store, engine, scheduler, interceptor, network, remote, bus, memory_only })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn is_memory_only(&self) -> bool {
        self.memory_only
    }

    /// Save a whole presentation tree.
    ///
    /// The draft is diffed against what is stored: unchanged records are
    /// skipped, missing children are deleted, and everything lands in one
    /// transaction. Returns the number of changes enqueued.
    pub async fn save_presentation(&self, draft: PresentationDraft) -> Result<usize, Error> {
        let existing = self.get_presentation(&draft.id).await?;
        let mut mutations = Vec::new();

        let unchanged = existing.as_ref().is_some_and(|tree| {
            tree.presentation.payload == draft.payload
                && (draft.project_id.is_none() || tree.presentation.project_id == draft.project_id)
        });
        if !unchanged {
            mutations.push(Mutation::PutPresentation {
                id: draft.id.clone(),
                project_id: draft.project_id.clone(),
                payload: draft.payload.clone(),
            });
        }

        let old_slides: Vec<SlideTree> = existing.map(|tree| tree.slides).unwrap_or_default();
        let kept_slides: HashSet<&str> = draft.slides.iter().map(|s| s.id.as_str()).collect();
        let kept_blocks: HashSet<&str> = draft.slides.iter().flat_map(|s| s.blocks.iter().map(|b| b.id.as_str())).collect();

        for old in &old_slides {
            if !kept_slides.contains(old.slide.id.as_str()) {
                mutations.push(Mutation::DeleteSlide { id: old.slide.id.clone() });
                continue;
            }
            for block in &old.blocks {
                if !kept_blocks.contains(block.id.as_str()) {
                    mutations.push(Mutation::DeleteBlock { id: block.id.clone() });
                }
            }
        }

        let slides: HashMap<&str, &SlideRecord> = old_slides.iter().map(|t| (t.slide.id.as_str(), &t.slide)).collect();
        let blocks: HashMap<&str, &BlockRecord> =
            old_slides.iter().flat_map(|t| t.blocks.iter().map(|b| (b.id.as_str(), b))).collect();
        let removed: HashSet<&str> =
            old_slides.iter().map(|t| t.slide.id.as_str()).filter(|id| !kept_slides.contains(id)).collect();

        for slide in &draft.slides {
            let same = slides.get(slide.id.as_str()).is_some_and(|old| {
                old.presentation_id == draft.id && old.position == slide.position && old.payload == slide.payload
            });
            if !same {
                mutations.push(Mutation::PutSlide {
                    id: slide.id.clone(),
                    presentation_id: draft.id.clone(),
                    position: slide.position,
                    payload: slide.payload.clone(),
                });
            }
            for block in &slide.blocks {
                // blocks of a deleted slide are gone locally and must be re-put
                let same = blocks.get(block.id.as_str()).is_some_and(|old| {
                    !removed.contains(old.slide_id.as_str())
                        && old.slide_id == slide.id
                        && old.position == block.position
                        && old.payload == block.payload
                });
                if !same {
                    mutations.push(Mutation::PutBlock {
                        id: block.id.clone(),
                        slide_id: slide.id.clone(),
                        position: block.position,
                        payload: block.payload.clone(),
                    });
                }
            }
        }

        if mutations.is_empty() {
            return Ok(0);
        }
        self.store.apply(mutations, now_millis()).await
    }

    /// Read a presentation with its slides and blocks.
    pub async fn get_presentation(&self, id: &str) -> Result<Option<PresentationTree>, Error> {
        let Some(presentation) = self.store.get_presentation(id).await? else {
            return Ok(None);
        };
        let mut slides = Vec::new();
        for slide in self.store.slides_for_presentation(id).await? {
            let blocks = self.store.blocks_for_slide(&slide.id).await?;
            slides.push(SlideTree { slide, blocks });
        }
        Ok(Some(PresentationTree { presentation, slides }))
    }

    pub async fn delete_presentation(&self, id: &str) -> Result<(), Error> {
        self.store.apply(vec![Mutation::DeletePresentation { id: id.to_string() }], now_millis()).await?;
        Ok(())
    }

    /// Presentations, most recently modified first.
    pub async fn list_presentations(&self) -> Result<Vec<PresentationRecord>, Error> {
        self.store.list_presentations().await
    }

    /// Save one slide and its blocks. Blocks no longer listed are deleted.
    pub async fn save_slide(&self, presentation_id: &str, draft: SlideDraft) -> Result<usize, Error> {
        let old_blocks = match self.store.get_slide(&draft.id).await? {
            Some(_) => self.store.blocks_for_slide(&draft.id).await?,
            None => Vec::new(),
        };
        let listed: HashSet<&str> = draft.blocks.iter().map(|b| b.id.as_str()).collect();

        let mut mutations = vec![Mutation::PutSlide {
            id: draft.id.clone(),
            presentation_id: presentation_id.to_string(),
            position: draft.position,
            payload: draft.payload.clone(),
        }];
        mutations.extend(
            old_blocks
                .iter()
                .filter(|b| !listed.contains(b.id.as_str()))
                .map(|b| Mutation::DeleteBlock { id: b.id.clone() }),
        );
        mutations.extend(draft.blocks.iter().map(|b| Mutation::PutBlock {
            id: b.id.clone(),
            slide_id: draft.id.clone(),
            position: b.position,
            payload: b.payload.clone(),
        }));
        self.store.apply(mutations, now_millis()).await
    }

    pub async fn delete_slide(&self, id: &str) -> Result<(), Error> {
        self.store.apply(vec![Mutation::DeleteSlide { id: id.to_string() }], now_millis()).await?;
        Ok(())
    }

    pub async fn save_block(&self, slide_id: &str, draft: BlockDraft) -> Result<(), Error> {
        let mutation = Mutation::PutBlock {
            id: draft.id,
            slide_id: slide_id.to_string(),
            position: draft.position,
            payload: draft.payload,
        };
        self.store.apply(vec![mutation], now_millis()).await?;
        Ok(())
    }

    pub async fn delete_block(&self, id: &str) -> Result<(), Error> {
        self.store.apply(vec![Mutation::DeleteBlock { id: id.to_string() }], now_millis()).await?;
        Ok(())
    }

    /// Fetch every presentation of a project and store it locally as synced.
    ///
    /// Presentations with unsynced local edits are left alone. Returns how
    /// many were written.
    pub async fn make_available_offline(&self, project_id: &str) -> Result<usize, Error> {
        let project = self.remote.fetch_project(project_id).await?;
        let mut written = 0;
        for presentation in project.presentations {
            let id = presentation.document.id.clone();
            let (record, slides, blocks) = split_remote(project_id, presentation);
            if self.store.cache_remote_presentation(record, slides, blocks).await? {
                written += 1;
            } else {
                tracing::debug!(presentation = %id, "local edits pending, remote copy not cached");
            }
        }
        tracing::info!(project = project_id, written, "project available offline");
        Ok(written)
    }

    /// Fetch an asset and mirror it in the Local Store. Returns the asset id.
    pub async fn cache_asset(&self, url: &str) -> Result<String, Error> {
        let url = canonicalize(url)?;
        let response = self.network.fetch(&url).await?;
        if !response.is_success() {
            return Err(Error::RemoteRejected { status: response.status, message: format!("asset {url}") });
        }
        self.store.put_asset(url.as_str(), response.bytes.to_vec(), response.content_type).await
    }

    pub async fn get_asset(&self, url: &str) -> Result<Option<AssetRecord>, Error> {
        let url = canonicalize(url)?;
        self.store.get_asset_by_url(url.as_str()).await
    }

    /// Remove mirrored assets untouched for longer than the retention window.
    pub async fn sweep_assets(&self) -> Result<u64, Error> {
        let cutoff = now_millis() - self.config.asset_retention().num_milliseconds();
        self.store.sweep_assets(cutoff).await
    }

    /// Refresh a reference cache from its API endpoint.
    ///
    /// The request goes through the interception layer, so an offline refresh
    /// may be served from the API cache. Entries without a string `id` are
    /// skipped.
    pub async fn refresh_references(&self, kind: ReferenceKind) -> Result<usize, Error> {
        let url = endpoint(&self.config.api_base_url, &[kind.as_str()])?;
        let response = match self.interceptor.handle(&InterceptRequest::get(url.clone())).await {
            Some(response) => response,
            None => {
                let fetched = self.network.fetch(&url).await?;
                InterceptedResponse {
                    status: fetched.status,
                    content_type: fetched.content_type,
                    body: fetched.bytes,
                    class: RequestClass::Passthrough,
                    source: ResponseSource::Network,
                }
            }
        };
        if response.source == ResponseSource::Offline {
            return Err(Error::Offline);
        }
        if !response.is_success() {
            return Err(Error::RemoteRejected { status: response.status, message: format!("{} refresh", kind.as_str()) });
        }

        let items: Vec<Value> = serde_json::from_slice(&response.body)?;
        let entries: Vec<(String, Value)> = items
            .into_iter()
            .filter_map(|item| {
                let id = item.get("id")?.as_str()?.to_string();
                Some((id, item))
            })
            .collect();
        self.store.replace_references(kind, entries).await
    }

    pub async fn references(&self, kind: ReferenceKind) -> Result<Vec<ReferenceRecord>, Error> {
        self.store.list_references(kind).await
    }

    /// Serve an outbound request through the interception layer.
    pub async fn handle(&self, request: &InterceptRequest) -> Option<InterceptedResponse> {
        self.interceptor.handle(request).await
    }

    pub async fn install(&self, base: &reqwest::Url) -> Result<usize, Error> {
        self.interceptor.install(base).await
    }

    pub async fn cache_command(&self, command: CacheCommand) -> Result<CommandOutcome, Error> {
        self.interceptor.handle_command(command).await
    }

    /// Run a sync pass now.
    pub async fn sync_now(&self) -> Result<SyncReport, Error> {
        self.engine.run_pass().await
    }

    pub async fn set_online(&self, online: bool) {
        let change = if online { Connectivity::Online } else { Connectivity::Offline };
        self.scheduler.notify(change).await;
    }

    pub fn start_background(&self) {
        self.scheduler.start();
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncState> {
        self.engine.subscribe_status()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe_events()
    }

    pub fn subscribe_instances(&self) -> broadcast::Receiver<InstanceMessage> {
        self.bus.subscribe()
    }

    /// Relay a push notification to every client instance.
    pub fn notify_instances(&self, title: impl Into<String>, body: impl Into<String>) -> usize {
        self.bus.publish(InstanceMessage::Notification { title: title.into(), body: body.into() })
    }

    pub async fn stats(&self) -> Result<StorageStats, Error> {
        let estimated_bytes = self.store.estimated_bytes().await?;
        let last_sync_at = self.store.last_sync_at().await?;
        Ok(StorageStats {
            presentations: self.store.count(Collection::Presentations).await?,
            slides: self.store.count(Collection::Slides).await?,
            blocks: self.store.count(Collection::Blocks).await?,
            assets: self.store.count(Collection::Assets).await?,
            pending_changes: self.store.pending_count().await?,
            estimated_bytes,
            estimated_size: human_bytes(estimated_bytes),
            last_sync_at,
            last_sync: last_sync_at.and_then(iso_millis),
            status: self.engine.status(),
            online: self.engine.is_online(),
            memory_only: self.memory_only,
            cache_version: self.config.cache_version.clone(),
        })
    }

    /// Stop background work and wait for pending cache refreshes.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.interceptor.settle().await;
    }
}

fn split_remote(
    project_id: &str, remote: RemotePresentation,
) -> (PresentationRecord, Vec<SlideRecord>, Vec<BlockRecord>) {
    let document = remote.document;
    let record = PresentationRecord {
        project_id: document.project_id.or_else(|| Some(project_id.to_string())),
        id: document.id,
        payload: Payload::Json(document.payload),
        last_modified: document.last_modified,
        synced: true,
    };
    let mut slides = Vec::new();
    let mut blocks = Vec::new();
    for slide in remote.slides {
        for block in slide.blocks {
            blocks.push(BlockRecord {
                id: block.id,
                slide_id: slide.id.clone(),
                position: block.position,
                payload: Payload::Json(block.payload),
                last_modified: block.last_modified,
            });
        }
        slides.push(SlideRecord {
            id: slide.id,
            presentation_id: record.id.clone(),
            position: slide.position,
            payload: Payload::Json(slide.payload),
            last_modified: slide.last_modified,
        });
    }
    (record, slides, blocks)
}

/// Startup cache lifecycle: precache the shell, then activate the current
/// version. Neither step is fatal; an unreachable origin only leaves the
/// static tier empty until the next install.
async fn prepare_caches(interceptor: &Interceptor, config: &AppConfig) {
    match canonicalize(&config.api_base_url) {
        Ok(base) => {
            if let Err(e) = interceptor.install(&base).await {
                tracing::warn!(error = %e, "cache install failed");
            }
        }
        Err(e) => tracing::warn!(url = %config.api_base_url, error = %e, "cannot derive origin for cache install"),
    }
    match interceptor.activate().await {
        Ok(purged) if !purged.is_empty() => tracing::info!(purged = ?purged, "stale cache versions removed"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "cache activation failed"),
    }
}
