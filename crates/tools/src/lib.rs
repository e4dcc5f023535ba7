pub mod browser;
pub mod mcp;
pub mod registry;

use async_trait::async_trait;
use chromepilot_core::Result;
use serde_json::Value;

pub use registry::ToolRegistry;

#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, params: Value) -> Result<Value>;
}
