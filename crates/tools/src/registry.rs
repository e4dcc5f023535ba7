use std::collections::BTreeMap;
use std::sync::Arc;

use chromepilot_core::{Error, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::mcp::provider::McpToolProvider;
use crate::Tool;

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = %schema.name, "Registering tool");
        self.tools.insert(schema.name, tool);
    }

    /// Register all tools exposed by an MCP server provider.
    pub async fn register_mcp_provider(&mut self, provider: &McpToolProvider) {
        for tool in provider.tools().await {
            let schema = tool.schema();
            debug!(name = %schema.name, server = %provider.server_name, "Registering MCP tool");
            self.tools.insert(schema.name, tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// OpenAI function-calling schemas for every registered tool.
    pub fn get_tool_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                let schema = tool.schema();
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters
                    }
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, params: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;
        tool.execute(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSchema;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".to_string(),
                description: "Echo params back".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, params: Value) -> Result<Value> {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn test_execute_registered_and_unknown() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.names(), vec!["echo"]);

        let out = registry.execute("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(out, json!({"x": 1}));

        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tool: missing"));
    }

    #[test]
    fn test_schema_shape() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let schemas = registry.get_tool_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "echo");
    }
}
