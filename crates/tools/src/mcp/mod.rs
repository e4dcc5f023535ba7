pub mod client;
pub mod provider;

pub use client::{McpClient, McpServerConfig, McpTool};
pub use provider::{McpToolProvider, McpToolWrapper};
