//! offdeck server entry point.
//!
//! Boots the storage facade and exposes it as an MCP server on stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use offdeck_client::StorageFacade;
use offdeck_core::AppConfig;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(db = %config.db_path.display(), api = %config.api_base_url, "Starting offdeck on stdio transport");

    let facade = Arc::new(StorageFacade::open(config).await?);
    facade.start_background();

    let handler = handler::OffdeckServer::new(facade.clone());
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;
    facade.shutdown().await;

    Ok(())
}
