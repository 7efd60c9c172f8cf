//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (OFFDECK_*)
//! 2. TOML config file (if OFFDECK_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::model::ConflictStrategy;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (OFFDECK_*)
/// 2. TOML config file (if OFFDECK_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the Local Store database.
    ///
    /// Set via OFFDECK_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Path to the cache tier database.
    ///
    /// Set via OFFDECK_CACHE_PATH environment variable.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Base URL of the remote store API.
    ///
    /// Set via OFFDECK_API_BASE_URL environment variable.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bearer token for the remote store.
    ///
    /// Set via OFFDECK_API_TOKEN environment variable.
    /// Required only when a remote client is constructed.
    #[serde(default)]
    pub api_token: Option<String>,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between background sync passes.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Failed attempts tolerated before a pending change is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Winner selection when local and remote both changed.
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    /// Asset mirror entries untouched for longer than this are swept.
    #[serde(default = "default_asset_retention_days")]
    pub asset_retention_days: i64,

    /// Seconds between asset mirror sweeps.
    #[serde(default = "default_asset_sweep_interval_secs")]
    pub asset_sweep_interval_secs: u64,

    /// Entries kept per cache tier before least recently used ones are evicted.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,

    /// Mirrored assets kept before least recently accessed ones are evicted.
    #[serde(default = "default_max_assets")]
    pub max_assets: usize,

    /// Version tag shared by every cache tier.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Application shell paths served stale-while-revalidate.
    #[serde(default = "default_static_paths")]
    pub static_paths: Vec<String>,

    /// File extensions treated as binary assets (cache-first).
    #[serde(default = "default_asset_extensions")]
    pub asset_extensions: Vec<String>,

    /// Read-only API path prefixes served network-first.
    #[serde(default = "default_api_whitelist")]
    pub api_whitelist: Vec<String>,

    /// Optional HTML file replacing the bundled offline page.
    #[serde(default)]
    pub offline_page_path: Option<PathBuf>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./offdeck.sqlite")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./offdeck-cache.sqlite")
}

fn default_api_base_url() -> String {
    "http://localhost:3000/api".into()
}

fn default_user_agent() -> String {
    "offdeck/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_asset_retention_days() -> i64 {
    7
}

fn default_asset_sweep_interval_secs() -> u64 {
    3600
}

fn default_max_cache_entries() -> usize {
    500
}

fn default_max_assets() -> usize {
    1000
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_static_paths() -> Vec<String> {
    ["/", "/index.html", "/manifest.json", "/offline.html"].into_iter().map(String::from).collect()
}

fn default_asset_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_api_whitelist() -> Vec<String> {
    ["/api/presentations", "/api/projects", "/api/templates", "/api/themes", "/api/preferences"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_path: default_cache_path(),
            api_base_url: default_api_base_url(),
            api_token: None,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            sync_interval_secs: default_sync_interval_secs(),
            max_retries: default_max_retries(),
            conflict_strategy: ConflictStrategy::default(),
            asset_retention_days: default_asset_retention_days(),
            asset_sweep_interval_secs: default_asset_sweep_interval_secs(),
            max_cache_entries: default_max_cache_entries(),
            max_assets: default_max_assets(),
            cache_version: default_cache_version(),
            static_paths: default_static_paths(),
            asset_extensions: default_asset_extensions(),
            api_whitelist: default_api_whitelist(),
            offline_page_path: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Background sync interval as Duration.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Asset sweep interval as Duration.
    pub fn asset_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.asset_sweep_interval_secs)
    }

    /// Asset retention window as a chrono Duration.
    pub fn asset_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.asset_retention_days)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `OFFDECK_`
    /// 2. TOML file from `OFFDECK_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("OFFDECK_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("OFFDECK_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Bearer token for the remote store (deferred validation).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the token is not set.
    pub fn require_api_token(&self) -> Result<&str, ConfigError> {
        self.api_token.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "api_token".into(),
            hint: "Set OFFDECK_API_TOKEN environment variable".into(),
        })
    }
}
