//! Request classification.

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use offdeck_core::{AppConfig, CacheTier};

use crate::fetch::extension;

/// Resource class deciding which strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// Create/update/delete. Never cached, never intercepted.
    Mutation,
    /// Binary asset, served cache-first.
    Asset,
    /// Whitelisted read-only API endpoint, served network-first.
    Api,
    /// Application shell file, served stale-while-revalidate.
    Static,
    /// Full-page navigation, network-first with an offline page.
    Navigation,
    /// Anything else goes straight to the network.
    Passthrough,
}

impl RequestClass {
    /// Cache tier backing this class, if it is cached at all.
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            RequestClass::Asset => Some(CacheTier::Assets),
            RequestClass::Api => Some(CacheTier::Api),
            RequestClass::Static | RequestClass::Navigation => Some(CacheTier::Static),
            RequestClass::Mutation | RequestClass::Passthrough => None,
        }
    }
}

/// Rules mapping a request to its [`RequestClass`].
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    asset_extensions: Vec<String>,
    api_prefixes: Vec<String>,
    static_paths: Vec<String>,
}

impl Classifier {
    pub fn new(asset_extensions: Vec<String>, api_prefixes: Vec<String>, static_paths: Vec<String>) -> Self {
        let asset_extensions = asset_extensions.into_iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect();
        Self { asset_extensions, api_prefixes, static_paths }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.asset_extensions.clone(), config.api_whitelist.clone(), config.static_paths.clone())
    }

    pub fn static_paths(&self) -> &[String] {
        &self.static_paths
    }

    /// Classify a request.
    ///
    /// Checked in order: method, asset extension, API prefix, shell path,
    /// navigation flag.
    pub fn classify(&self, method: &Method, url: &Url, navigate: bool) -> RequestClass {
        if *method != Method::GET {
            return RequestClass::Mutation;
        }
        if let Some(ext) = extension(url)
            && self.asset_extensions.contains(&ext)
        {
            return RequestClass::Asset;
        }
        let path = url.path();
        if self.api_prefixes.iter().any(|prefix| path_has_prefix(path, prefix)) {
            return RequestClass::Api;
        }
        if self.static_paths.iter().any(|p| p == path) {
            return RequestClass::Static;
        }
        if navigate {
            return RequestClass::Navigation;
        }
        RequestClass::Passthrough
    }
}

/// Segment-aware prefix test: `/api/themes` matches `/api/themes/7` but not
/// `/api/themesx`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
