//! sync_now and set_connectivity tools.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use offdeck_client::{StorageFacade, SyncStatus};

use super::json_result;

/// Parameters for the set_connectivity tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetConnectivityParams {
    /// Whether the host is online. Coming online triggers a sync pass when
    /// background sync is running.
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetConnectivityOutput {
    pub online: bool,
    pub status: SyncStatus,
}

pub async fn sync_now_impl(facade: &StorageFacade) -> Result<CallToolResult, McpError> {
    let report = facade.sync_now().await?;
    json_result(&report)
}

pub async fn set_connectivity_impl(
    facade: &StorageFacade, params: SetConnectivityParams,
) -> Result<CallToolResult, McpError> {
    facade.set_online(params.online).await;
    let stats = facade.stats().await?;
    json_result(&SetConnectivityOutput { online: stats.online, status: stats.status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{facade, text};

    #[tokio::test]
    async fn test_offline_sync_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let facade = facade(&dir).await;

        let output = text(&set_connectivity_impl(&facade, SetConnectivityParams { online: false }).await.unwrap());
        assert_eq!(output["online"], false);
        assert_eq!(output["status"], "offline");

        let err = sync_now_impl(&facade).await.unwrap_err();
        assert_eq!(err.code.0, -32010);

        let output = text(&set_connectivity_impl(&facade, SetConnectivityParams { online: true }).await.unwrap());
        assert_eq!(output["status"], "idle");
    }

    #[tokio::test]
    async fn test_sync_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let facade = facade(&dir).await;

        let output = text(&sync_now_impl(&facade).await.unwrap());
        assert_eq!(output["pushed"], 0);
        assert_eq!(output["failed"], 0);
    }
}
