//! Structured errors for tool parameter handling.
//!
//! Storage and sync failures arrive as `offdeck_core::Error`, which already
//! converts into MCP errors; these cover what the server itself rejects.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid input parameters (e.g., missing URLs for `cache_urls`).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Cache command name not recognized.
    #[error("UNKNOWN_COMMAND: {0}")]
    UnknownCommand(String),

    /// Tool output could not be encoded.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let (code, message) = match &err {
            ToolError::InvalidInput(msg) => (-32602, msg.clone()),
            ToolError::UnknownCommand(msg) => (-32601, format!("unknown cache command: {msg}")),
            ToolError::Serialization(msg) => (-32005, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
