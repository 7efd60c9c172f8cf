//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `sync_interval_secs` or `asset_sweep_interval_secs` is 0
    /// - `max_retries` is 0 or exceeds 50
    /// - `asset_retention_days` is less than 1
    /// - `max_cache_entries` or `max_assets` is 0
    /// - `cache_version`, `user_agent` or `api_base_url` is empty
    /// - `api_base_url` is not an http(s) URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sync_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.asset_sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "asset_sweep_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.max_retries == 0 || self.max_retries > 50 {
            return Err(ConfigError::Invalid { field: "max_retries".into(), reason: "must be between 1 and 50".into() });
        }

        if self.asset_retention_days < 1 {
            return Err(ConfigError::Invalid {
                field: "asset_retention_days".into(),
                reason: "must be at least 1 day".into(),
            });
        }

        if self.max_cache_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_cache_entries".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_assets == 0 {
            return Err(ConfigError::Invalid { field: "max_assets".into(), reason: "must be greater than 0".into() });
        }

        if self.cache_version.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "cache_version".into(), reason: "must not be empty".into() });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "api_base_url".into(),
                reason: "must be an http:// or https:// URL".into(),
            });
        }

        if self.api_token.is_none() {
            tracing::warn!("api_token is not set; remote sync will be unavailable until OFFDECK_API_TOKEN is provided");
        }

        Ok(())
    }
}
