//! storage_stats and list_presentations tools.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use offdeck_client::StorageFacade;

use super::json_result;

/// Parameters for the list_presentations tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListPresentationsParams {
    /// Return at most this many presentations (most recent first).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One row of the list_presentations output. Payloads are omitted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PresentationSummary {
    pub id: String,
    pub project_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub synced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListPresentationsOutput {
    pub total: usize,
    pub presentations: Vec<PresentationSummary>,
}

pub async fn stats_impl(facade: &StorageFacade) -> Result<CallToolResult, McpError> {
    let stats = facade.stats().await?;
    json_result(&stats)
}

pub async fn list_impl(facade: &StorageFacade, params: ListPresentationsParams) -> Result<CallToolResult, McpError> {
    let records = facade.list_presentations().await?;
    let total = records.len();
    let presentations = records
        .into_iter()
        .take(params.limit.unwrap_or(usize::MAX))
        .map(|r| PresentationSummary {
            id: r.id,
            project_id: r.project_id,
            last_modified: r.last_modified,
            synced: r.synced,
        })
        .collect();
    json_result(&ListPresentationsOutput { total, presentations })
}
