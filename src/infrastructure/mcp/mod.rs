mod error;
mod process;

use crate::domain::types::{ToolCallOutput, ToolDescriptor};
use async_trait::async_trait;
use serde_json::Value;

pub use error::McpError;
pub use process::McpProcess;

/// Boundary to the tool-providing backend. One enumeration at session
/// startup, one outbound call per invocation; no retries at this layer.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallOutput, McpError>;
}
