//! Network interception layer.
//!
//! Every outbound GET is classified and served by a per-class strategy over
//! the cache tiers:
//!
//! | Class      | Strategy                  | Total failure          |
//! |------------|---------------------------|------------------------|
//! | Asset      | cache-first               | placeholder SVG        |
//! | Api        | network-first             | offline JSON (503)     |
//! | Static     | stale-while-revalidate    | offline page (503)     |
//! | Navigation | network-first             | offline page (503)     |
//!
//! Mutations are never intercepted. Cache failures degrade to a miss; no
//! strategy returns an error.

pub mod classify;
pub mod offline;

use std::sync::Arc;

use bytes::Bytes;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use offdeck_core::{CacheTier, CacheTiers, CachedResponse, Error};

pub use classify::{Classifier, RequestClass};

use crate::fetch::{FetchResponse, Network, canonicalize, resolve};
use crate::messaging::{InstanceBus, InstanceMessage};

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    Placeholder,
    Offline,
}

/// An outbound request as seen by the interception layer.
#[derive(Debug, Clone)]
pub struct InterceptRequest {
    pub method: Method,
    pub url: Url,
    /// Top-level page navigation.
    pub navigate: bool,
}

impl InterceptRequest {
    pub fn get(url: Url) -> Self {
        Self { method: Method::GET, url, navigate: false }
    }

    pub fn navigate(url: Url) -> Self {
        Self { method: Method::GET, url, navigate: true }
    }
}

/// Response produced by a strategy.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub class: RequestClass,
    pub source: ResponseSource,
}

impl InterceptedResponse {
    fn from_network(class: RequestClass, response: FetchResponse) -> Self {
        Self {
            status: response.status,
            content_type: response.content_type,
            body: response.bytes,
            class,
            source: ResponseSource::Network,
        }
    }

    fn from_cache(class: RequestClass, cached: CachedResponse) -> Self {
        Self {
            status: cached.status,
            content_type: cached.content_type,
            body: Bytes::from(cached.body),
            class,
            source: ResponseSource::Cache,
        }
    }

    fn synthetic(class: RequestClass, source: ResponseSource, status: u16, content_type: &str, body: Bytes) -> Self {
        Self { status, content_type: Some(content_type.to_string()), body, class, source }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Cache lifecycle commands sent by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "type", content = "urls", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheCommand {
    /// Activate the current cache version immediately.
    SkipWaiting,
    /// Fetch and store the given absolute URLs.
    CacheUrls(Vec<String>),
    /// Drop every cache.
    ClearCache,
}

/// Result of a [`CacheCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Activated { purged: Vec<String> },
    Cached { stored: usize, skipped: Vec<String> },
    Cleared { caches: usize },
}

/// Applies the per-class caching strategies.
pub struct Interceptor {
    tiers: CacheTiers,
    network: Arc<dyn Network>,
    classifier: Classifier,
    bus: InstanceBus,
    offline_page: Bytes,
    revalidations: Mutex<JoinSet<()>>,
}

impl Interceptor {
    pub fn new(tiers: CacheTiers, network: Arc<dyn Network>, classifier: Classifier, bus: InstanceBus) -> Self {
        Self {
            tiers,
            network,
            classifier,
            bus,
            offline_page: Bytes::from_static(offline::OFFLINE_PAGE.as_bytes()),
            revalidations: Mutex::new(JoinSet::new()),
        }
    }

    /// Replace the bundled offline page.
    pub fn with_offline_page(mut self, html: impl Into<Bytes>) -> Self {
        self.offline_page = html.into();
        self
    }

    pub fn tiers(&self) -> &CacheTiers {
        &self.tiers
    }

    pub fn classify(&self, request: &InterceptRequest) -> RequestClass {
        self.classifier.classify(&request.method, &request.url, request.navigate)
    }

    /// Serve a request through its strategy.
    ///
    /// Returns `None` for mutations and unclassified requests; the caller
    /// sends those to the network untouched.
    pub async fn handle(&self, request: &InterceptRequest) -> Option<InterceptedResponse> {
        let class = self.classify(request);
        let url = &request.url;
        let response = match class {
            RequestClass::Mutation | RequestClass::Passthrough => return None,
            RequestClass::Asset => self.cache_first(url).await,
            RequestClass::Api => self.network_first_api(url).await,
            RequestClass::Static => self.stale_while_revalidate(url).await,
            RequestClass::Navigation => self.network_first_page(url).await,
        };
        tracing::debug!(url = %url, ?class, source = ?response.source, status = response.status, "intercepted");
        Some(response)
    }

    async fn cached(&self, tier: CacheTier, url: &Url) -> Option<CachedResponse> {
        match self.tiers.match_url(tier, url.as_str()).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(url = %url, tier = tier.as_str(), error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, tier: CacheTier, response: &FetchResponse) {
        store_response(&self.tiers, tier, response).await;
    }

    async fn cache_first(&self, url: &Url) -> InterceptedResponse {
        let class = RequestClass::Asset;
        if let Some(hit) = self.cached(CacheTier::Assets, url).await {
            return InterceptedResponse::from_cache(class, hit);
        }
        match self.network.fetch(url).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(CacheTier::Assets, &response).await;
                }
                InterceptedResponse::from_network(class, response)
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "asset unavailable, serving placeholder");
                InterceptedResponse::synthetic(
                    class,
                    ResponseSource::Placeholder,
                    200,
                    offline::PLACEHOLDER_CONTENT_TYPE,
                    Bytes::from_static(offline::PLACEHOLDER_SVG.as_bytes()),
                )
            }
        }
    }

    async fn network_first_api(&self, url: &Url) -> InterceptedResponse {
        let class = RequestClass::Api;
        let failure = match self.network.fetch(url).await {
            Ok(response) if response.is_success() => {
                self.store(CacheTier::Api, &response).await;
                return InterceptedResponse::from_network(class, response);
            }
            Ok(response) => Some(response),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "api fetch failed, trying cache");
                None
            }
        };
        if let Some(hit) = self.cached(CacheTier::Api, url).await {
            return InterceptedResponse::from_cache(class, hit);
        }
        match failure {
            Some(response) => InterceptedResponse::from_network(class, response),
            None => InterceptedResponse::synthetic(
                class,
                ResponseSource::Offline,
                offline::OFFLINE_STATUS,
                "application/json",
                Bytes::from(offline::offline_json(url.as_str())),
            ),
        }
    }

    async fn stale_while_revalidate(&self, url: &Url) -> InterceptedResponse {
        let class = RequestClass::Static;
        if let Some(hit) = self.cached(CacheTier::Static, url).await {
            self.spawn_revalidation(url.clone()).await;
            return InterceptedResponse::from_cache(class, hit);
        }
        match self.network.fetch(url).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(CacheTier::Static, &response).await;
                }
                InterceptedResponse::from_network(class, response)
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "shell file unavailable");
                self.offline_page(class)
            }
        }
    }

    async fn network_first_page(&self, url: &Url) -> InterceptedResponse {
        let class = RequestClass::Navigation;
        match self.network.fetch(url).await {
            Ok(response) => InterceptedResponse::from_network(class, response),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "navigation failed, trying cache");
                match self.cached(CacheTier::Static, url).await {
                    Some(hit) => InterceptedResponse::from_cache(class, hit),
                    None => self.offline_page(class),
                }
            }
        }
    }

    fn offline_page(&self, class: RequestClass) -> InterceptedResponse {
        InterceptedResponse::synthetic(
            class,
            ResponseSource::Offline,
            offline::OFFLINE_STATUS,
            "text/html; charset=utf-8",
            self.offline_page.clone(),
        )
    }

    async fn spawn_revalidation(&self, url: Url) {
        let tiers = self.tiers.clone();
        let network = self.network.clone();
        let mut tasks = self.revalidations.lock().await;
        // reap finished refreshes so the set does not grow unbounded
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            match network.fetch(&url).await {
                Ok(response) if response.is_success() => store_response(&tiers, CacheTier::Static, &response).await,
                Ok(response) => tracing::debug!(url = %url, status = response.status, "revalidation skipped"),
                Err(e) => tracing::debug!(url = %url, error = %e, "revalidation failed"),
            }
        });
    }

    /// Wait for in-flight revalidations to finish.
    pub async fn settle(&self) {
        let mut tasks = self.revalidations.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "revalidation task panicked");
            }
        }
    }

    /// Precache the application shell relative to `base`.
    ///
    /// Returns the number of files stored. Paths that fail to fetch are
    /// logged and skipped.
    pub async fn install(&self, base: &Url) -> Result<usize, Error> {
        let mut stored = 0;
        for path in self.classifier.static_paths() {
            let url = resolve(base, path)?;
            match self.network.fetch(&url).await {
                Ok(response) if response.is_success() => {
                    self.tiers.put(CacheTier::Static, &response.to_cached()).await?;
                    stored += 1;
                }
                Ok(response) => tracing::warn!(url = %url, status = response.status, "precache rejected"),
                Err(e) => tracing::warn!(url = %url, error = %e, "precache failed"),
            }
        }
        tracing::info!(stored, version = self.tiers.version(), "cache installed");
        Ok(stored)
    }

    /// Make the current cache version authoritative and purge the rest.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        let purged = self.tiers.activate().await?;
        self.bus
            .publish(InstanceMessage::CacheActivated { version: self.tiers.version().to_string(), purged: purged.clone() });
        Ok(purged)
    }

    pub async fn handle_command(&self, command: CacheCommand) -> Result<CommandOutcome, Error> {
        match command {
            CacheCommand::SkipWaiting => Ok(CommandOutcome::Activated { purged: self.activate().await? }),
            CacheCommand::CacheUrls(urls) => self.cache_urls(urls).await,
            CacheCommand::ClearCache => {
                let caches = self.tiers.clear().await?;
                tracing::info!(caches, "caches cleared");
                Ok(CommandOutcome::Cleared { caches })
            }
        }
    }

    async fn cache_urls(&self, urls: Vec<String>) -> Result<CommandOutcome, Error> {
        let mut stored = 0;
        let mut skipped = Vec::new();
        for raw in urls {
            let Ok(url) = canonicalize(&raw) else {
                skipped.push(raw);
                continue;
            };
            let tier = self.classifier.classify(&Method::GET, &url, false).tier().unwrap_or(CacheTier::Static);
            match self.network.fetch(&url).await {
                Ok(response) if response.is_success() => {
                    self.tiers.put(tier, &response.to_cached()).await?;
                    stored += 1;
                }
                Ok(_) | Err(_) => skipped.push(raw),
            }
        }
        Ok(CommandOutcome::Cached { stored, skipped })
    }
}

async fn store_response(tiers: &CacheTiers, tier: CacheTier, response: &FetchResponse) {
    if let Err(e) = tiers.put(tier, &response.to_cached()).await {
        tracing::warn!(url = %response.url, tier = tier.as_str(), error = %e, "cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNetwork;
    use offdeck_core::{AppConfig, CacheDb};

    async fn setup() -> (Interceptor, Arc<FakeNetwork>, InstanceBus) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(FakeNetwork::default());
        let bus = InstanceBus::new();
        let interceptor = Interceptor::new(
            CacheTiers::new(db, "v1"),
            network.clone(),
            Classifier::from_config(&AppConfig::default()),
            bus.clone(),
        );
        (interceptor, network, bus)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_asset_placeholder_then_cached_copy() {
        let (interceptor, network, _) = setup().await;
        let logo = url("https://cdn.test/img/logo.png");
        let request = InterceptRequest::get(logo.clone());

        network.set_online(false);
        let first = interceptor.handle(&request).await.unwrap();
        assert_eq!(first.source, ResponseSource::Placeholder);
        assert_eq!(first.content_type.as_deref(), Some("image/svg+xml"));

        network.set_online(true);
        network.route(logo.as_str(), 200, "image/png", &[0x89, 0x50, 0x4e, 0x47]);
        let fetched = interceptor.handle(&request).await.unwrap();
        assert_eq!(fetched.source, ResponseSource::Network);

        network.set_online(false);
        let cached = interceptor.handle(&request).await.unwrap();
        assert_eq!(cached.source, ResponseSource::Cache);
        assert_eq!(cached.body.as_ref(), &[0x89, 0x50, 0x4e, 0x47]);
        assert_eq!(network.hits(logo.as_str()), 2);
    }

    #[tokio::test]
    async fn test_api_falls_back_to_cache_then_offline_error() {
        let (interceptor, network, _) = setup().await;
        let themes = InterceptRequest::get(url("https://app.test/api/themes"));
        let templates = InterceptRequest::get(url("https://app.test/api/templates"));

        network.route("https://app.test/api/themes", 200, "application/json", br#"[{"id":"dark"}]"#);
        let live = interceptor.handle(&themes).await.unwrap();
        assert_eq!(live.source, ResponseSource::Network);

        network.set_online(false);
        let cached = interceptor.handle(&themes).await.unwrap();
        assert_eq!(cached.source, ResponseSource::Cache);
        assert_eq!(cached.body.as_ref(), br#"[{"id":"dark"}]"#);

        let missing = interceptor.handle(&templates).await.unwrap();
        assert_eq!(missing.source, ResponseSource::Offline);
        assert_eq!(missing.status, 503);
        let body: serde_json::Value = serde_json::from_slice(&missing.body).unwrap();
        assert_eq!(body["error"], "offline");
    }

    #[tokio::test]
    async fn test_api_error_status_is_not_cached() {
        let (interceptor, network, _) = setup().await;
        let request = InterceptRequest::get(url("https://app.test/api/projects/9"));
        network.route("https://app.test/api/projects/9", 500, "application/json", b"{}");

        let response = interceptor.handle(&request).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.source, ResponseSource::Network);
        assert!(interceptor.tiers().keys(CacheTier::Api).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_serves_stale_and_revalidates() {
        let (interceptor, network, _) = setup().await;
        let manifest = "https://app.test/manifest.json";
        let request = InterceptRequest::get(url(manifest));

        network.route(manifest, 200, "application/json", br#"{"v":1}"#);
        assert_eq!(interceptor.handle(&request).await.unwrap().source, ResponseSource::Network);

        network.route(manifest, 200, "application/json", br#"{"v":2}"#);
        let stale = interceptor.handle(&request).await.unwrap();
        assert_eq!(stale.source, ResponseSource::Cache);
        assert_eq!(stale.body.as_ref(), br#"{"v":1}"#);

        interceptor.settle().await;
        let fresh = interceptor.handle(&request).await.unwrap();
        assert_eq!(fresh.body.as_ref(), br#"{"v":2}"#);
        interceptor.settle().await;
    }

    #[tokio::test]
    async fn test_navigation_offline_page() {
        let (interceptor, network, _) = setup().await;
        network.set_online(false);
        let response = interceptor.handle(&InterceptRequest::navigate(url("https://app.test/decks/1"))).await.unwrap();
        assert_eq!(response.class, RequestClass::Navigation);
        assert_eq!(response.source, ResponseSource::Offline);
        assert_eq!(response.status, 503);
        assert!(String::from_utf8_lossy(&response.body).contains("You are offline"));
    }

    #[tokio::test]
    async fn test_mutations_pass_through() {
        let (interceptor, network, _) = setup().await;
        let request = InterceptRequest {
            method: Method::POST,
            url: url("https://app.test/api/presentations"),
            navigate: false,
        };
        assert!(interceptor.handle(&request).await.is_none());
        assert_eq!(network.hits("https://app.test/api/presentations"), 0);
    }

    #[tokio::test]
    async fn test_install_activate_and_commands() {
        let (interceptor, network, bus) = setup().await;
        let mut instances = bus.subscribe();
        let base = url("https://app.test/");
        network.route("https://app.test/", 200, "text/html", b"<html></html>");
        network.route("https://app.test/index.html", 200, "text/html", b"<html></html>");
        network.route("https://app.test/manifest.json", 200, "application/json", b"{}");

        assert_eq!(interceptor.install(&base).await.unwrap(), 3);

        let outcome = interceptor.handle_command(CacheCommand::SkipWaiting).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Activated { purged: vec![] });
        assert!(matches!(instances.recv().await.unwrap(), InstanceMessage::CacheActivated { .. }));

        network.route("https://cdn.test/a.png", 200, "image/png", b"png");
        let outcome = interceptor
            .handle_command(CacheCommand::CacheUrls(vec!["https://cdn.test/a.png".into(), "ftp://x".into()]))
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Cached { stored: 1, skipped: vec!["ftp://x".into()] });
        assert_eq!(interceptor.tiers().keys(CacheTier::Assets).await.unwrap(), vec!["https://cdn.test/a.png"]);

        let outcome = interceptor.handle_command(CacheCommand::ClearCache).await.unwrap();
        assert!(matches!(outcome, CommandOutcome::Cleared { caches } if caches >= 2));
    }
}
