use crate::domain::types::{FunctionDeclaration, ToolDescriptor};
use crate::infrastructure::mcp::{McpError, ToolBackend};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to enumerate backend tools: {source}")]
    Enumeration {
        #[source]
        source: McpError,
    },
    #[error("tool backend reported an empty toolset")]
    NoTools,
}

/// Snapshot of the backend's tool catalog, taken once per session. Order is
/// the backend's enumeration order and is stable for the session's lifetime.
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Fetch the toolset from the backend. A backend that cannot enumerate
    /// tools, or enumerates none, fails the session at startup instead of
    /// silently proceeding without tools.
    pub async fn load(backend: &dyn ToolBackend) -> Result<Self, RegistryError> {
        let tools = backend
            .list_tools()
            .await
            .map_err(|source| RegistryError::Enumeration { source })?;
        if tools.is_empty() {
            warn!("Tool backend enumerated zero tools");
            return Err(RegistryError::NoTools);
        }
        info!(tools = tools.len(), "Loaded tool registry");
        Ok(Self::from_descriptors(tools))
    }

    pub fn from_descriptors(tools: Vec<ToolDescriptor>) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(position, tool)| (tool.name.clone(), position))
            .collect();
        Self { tools, index }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&position| &self.tools[position])
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Pure projection into the model-facing declaration format. Preserves
    /// registry order and length; no side effects.
    pub fn to_function_declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("{name} description"),
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    #[test]
    fn projection_preserves_order_and_length() {
        let names = ["send_email", "get_messages", "create_task", "aaa_last"];
        let registry =
            ToolRegistry::from_descriptors(names.iter().map(|name| descriptor(name)).collect());

        let declarations = registry.to_function_declarations();
        assert_eq!(declarations.len(), registry.len());
        for (declaration, name) in declarations.iter().zip(names) {
            assert_eq!(declaration.name, name);
        }
    }

    #[test]
    fn projection_carries_description_and_schema() {
        let registry = ToolRegistry::from_descriptors(vec![ToolDescriptor {
            name: "list_emails".into(),
            description: "List recent emails".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "folder": { "type": "string" } }
            }),
        }]);

        let declarations = registry.to_function_declarations();
        assert_eq!(declarations[0].description, "List recent emails");
        assert_eq!(
            declarations[0].parameters["properties"]["folder"]["type"],
            "string"
        );
    }

    #[test]
    fn lookup_by_name() {
        let registry = ToolRegistry::from_descriptors(vec![
            descriptor("send_email"),
            descriptor("get_messages"),
        ]);
        assert!(registry.get("get_messages").is_some());
        assert!(registry.get("nonexistent_tool").is_none());
    }
}
