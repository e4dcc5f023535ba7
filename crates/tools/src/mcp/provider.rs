use std::sync::Arc;

use async_trait::async_trait;
use chromepilot_core::Result;
use serde_json::Value;
use tracing::{info, warn};

use crate::mcp::client::{McpClient, McpTool};
use crate::{Tool, ToolSchema};

/// A single MCP tool exposed as a local `Tool`, under the server's own name.
pub struct McpToolWrapper {
    tool: McpTool,
    client: Arc<McpClient>,
}

impl McpToolWrapper {
    pub fn new(tool: McpTool, client: Arc<McpClient>) -> Self {
        Self { tool, client }
    }
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.tool.name.clone(),
            description: self.tool.description.clone().unwrap_or_default(),
            parameters: self.tool.input_schema.clone(),
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        info!(tool = %self.tool.name, server = %self.client.server_name(), "Executing MCP tool");
        self.client.call_tool(&self.tool.name, params).await
    }
}

/// A running MCP server and the tools it exposes.
pub struct McpToolProvider {
    pub server_name: String,
    pub client: Arc<McpClient>,
}

impl McpToolProvider {
    pub fn new(client: Arc<McpClient>) -> Self {
        Self {
            server_name: client.server_name().to_string(),
            client,
        }
    }

    pub async fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let listed = match self.client.list_tools().await {
            Ok(t) => t,
            Err(e) => {
                warn!(server = %self.server_name, error = %e, "Failed to list MCP tools");
                return Vec::new();
            }
        };
        listed
            .into_iter()
            .map(|t| Arc::new(McpToolWrapper::new(t, self.client.clone())) as Arc<dyn Tool>)
            .collect()
    }
}
