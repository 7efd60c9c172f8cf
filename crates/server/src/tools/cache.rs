//! cache_control and sweep_assets tools.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use offdeck_client::{CacheCommand, StorageFacade};

use super::json_result;
use crate::error::ToolError;

/// Parameters for the cache_control tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheControlParams {
    /// One of `SKIP_WAITING`, `CACHE_URLS`, `CLEAR_CACHE` (case-insensitive).
    pub command: String,

    /// Absolute URLs to store, required for `CACHE_URLS`.
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SweepAssetsOutput {
    /// Mirrored assets removed.
    pub removed: u64,
}

fn parse_command(params: CacheControlParams) -> Result<CacheCommand, ToolError> {
    match params.command.to_ascii_uppercase().as_str() {
        "SKIP_WAITING" => Ok(CacheCommand::SkipWaiting),
        "CLEAR_CACHE" => Ok(CacheCommand::ClearCache),
        "CACHE_URLS" if params.urls.is_empty() => Err(ToolError::InvalidInput("CACHE_URLS requires urls".into())),
        "CACHE_URLS" => Ok(CacheCommand::CacheUrls(params.urls)),
        _ => Err(ToolError::UnknownCommand(params.command)),
    }
}

pub async fn cache_control_impl(facade: &StorageFacade, params: CacheControlParams) -> Result<CallToolResult, McpError> {
    let command = parse_command(params)?;
    tracing::info!(?command, "cache command");
    let outcome = facade.cache_command(command).await?;
    json_result(&outcome)
}

pub async fn sweep_impl(facade: &StorageFacade) -> Result<CallToolResult, McpError> {
    let removed = facade.sweep_assets().await?;
    json_result(&SweepAssetsOutput { removed })
}
