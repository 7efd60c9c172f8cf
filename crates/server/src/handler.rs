//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the storage facade.
use std::sync::Arc;

use offdeck_client::StorageFacade;

use crate::tools::cache::{CacheControlParams, cache_control_impl, sweep_impl};
use crate::tools::stats::{ListPresentationsParams, list_impl, stats_impl};
use crate::tools::sync::{SetConnectivityParams, set_connectivity_impl, sync_now_impl};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for offdeck.
#[derive(Clone)]
pub struct OffdeckServer {
    facade: Arc<StorageFacade>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl OffdeckServer {
    pub fn new(facade: Arc<StorageFacade>) -> Self {
        Self { facade, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Storage diagnostics: record counts, pending changes, estimated size, last sync time and sync status."
    )]
    async fn storage_stats(&self) -> Result<CallToolResult, McpError> {
        stats_impl(&self.facade).await
    }

    #[tool(description = "List locally stored presentations, most recently modified first, with their sync flag.")]
    async fn list_presentations(
        &self, params: Parameters<ListPresentationsParams>,
    ) -> Result<CallToolResult, McpError> {
        list_impl(&self.facade, params.0).await
    }

    #[tool(description = "Run a sync pass now: drain pending changes and reconcile unsynced presentations.")]
    async fn sync_now(&self) -> Result<CallToolResult, McpError> {
        sync_now_impl(&self.facade).await
    }

    #[tool(description = "Report host connectivity. Going online triggers a sync pass.")]
    async fn set_connectivity(&self, params: Parameters<SetConnectivityParams>) -> Result<CallToolResult, McpError> {
        set_connectivity_impl(&self.facade, params.0).await
    }

    /// Cache lifecycle control.
    ///
    /// `SKIP_WAITING` activates the current cache version and purges older
    /// ones, `CACHE_URLS` stores the given URLs, `CLEAR_CACHE` drops every cache.
    #[tool(description = "Cache lifecycle command: SKIP_WAITING, CACHE_URLS (with urls) or CLEAR_CACHE.")]
    async fn cache_control(&self, params: Parameters<CacheControlParams>) -> Result<CallToolResult, McpError> {
        cache_control_impl(&self.facade, params.0).await
    }

    #[tool(description = "Remove mirrored assets not accessed within the retention window.")]
    async fn sweep_assets(&self) -> Result<CallToolResult, McpError> {
        sweep_impl(&self.facade).await
    }
}

impl ServerHandler for OffdeckServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "offdeck".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
