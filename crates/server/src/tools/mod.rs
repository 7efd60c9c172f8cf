//! MCP tool implementations.
//!
//! Each tool takes the shared facade and returns pretty-printed JSON text.

pub mod cache;
pub mod stats;
pub mod sync;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ToolError;

pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(|e| ToolError::Serialization(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use offdeck_client::{FetchClient, FetchConfig, HttpRemoteStore, StorageFacade};
    use offdeck_core::AppConfig;
    use rmcp::model::CallToolResult;

    pub(crate) async fn facade(dir: &tempfile::TempDir) -> Arc<StorageFacade> {
        let config = AppConfig {
            db_path: dir.path().join("store.sqlite"),
            cache_path: dir.path().join("cache.sqlite"),
            api_base_url: "http://127.0.0.1:9/api".into(),
            api_token: Some("test-token".into()),
            ..Default::default()
        };
        let remote = HttpRemoteStore::from_config(&config).unwrap();
        let network = FetchClient::new(FetchConfig::from_app(&config)).unwrap();
        Arc::new(StorageFacade::open_with(config, Arc::new(remote), Arc::new(network)).await.unwrap())
    }

    pub(crate) fn text(result: &CallToolResult) -> serde_json::Value {
        let content = serde_json::to_value(&result.content[0]).unwrap();
        let text = content.get("text").and_then(|v| v.as_str()).expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}
