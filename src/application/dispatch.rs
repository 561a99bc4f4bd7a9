use super::registry::ToolRegistry;
use crate::domain::types::{ContentItem, ToolInvocationResult};
use crate::infrastructure::mcp::{McpError, ToolBackend};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool requested: {0}")]
    UnknownTool(String),
    #[error("failed to invoke tool '{tool}': {reason}")]
    Invocation {
        tool: String,
        reason: String,
        #[source]
        source: Option<McpError>,
    },
}

impl DispatchError {
    fn invocation(tool: &str, source: McpError) -> Self {
        Self::Invocation {
            tool: tool.to_string(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    fn no_text(tool: &str) -> Self {
        Self::Invocation {
            tool: tool.to_string(),
            reason: "expected text content, got none".to_string(),
            source: None,
        }
    }

    /// True when the underlying transport is gone and the session cannot
    /// continue; every other dispatch failure is recoverable in-loop.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            DispatchError::Invocation {
                source: Some(McpError::Terminated { .. } | McpError::Transport { .. }),
                ..
            }
        )
    }
}

/// Routes a model-issued function call onto the tool backend and flattens the
/// response to a single text value. One outbound call per invocation, no
/// retries; resilience is a caller-side policy.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn ToolBackend>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, backend: Arc<dyn ToolBackend>) -> Self {
        Self { registry, backend }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolInvocationResult, DispatchError> {
        // Unknown names are rejected before any backend traffic.
        if self.registry.get(name).is_none() {
            warn!(tool = name, "Model requested a tool absent from the registry");
            return Err(DispatchError::UnknownTool(name.to_string()));
        }

        debug!(tool = name, "Dispatching tool invocation");
        let output = self
            .backend
            .call_tool(name, Value::Object(arguments))
            .await
            .map_err(|source| DispatchError::invocation(name, source))?;

        let text = output.content.into_iter().find_map(|item| match item {
            ContentItem::Text(text) => Some(text),
            ContentItem::Other(_) => None,
        });

        match text {
            Some(text) => {
                info!(tool = name, is_error = output.is_error, "Tool invocation completed");
                Ok(ToolInvocationResult { text })
            }
            None => Err(DispatchError::no_text(name)),
        }
    }
}
