pub mod bootstrap;
pub mod chat;
pub mod profile;
pub mod web;

use std::sync::Arc;

use chromepilot_agent::{instructions_for, Agent, SharedSession};
use chromepilot_core::{Config, Paths};
use chromepilot_providers::OpenAIProvider;
use chromepilot_storage::StateStore;
use chromepilot_tools::browser::{ProbeOptions, ReadinessProber};
use chromepilot_tools::mcp::{McpClient, McpServerConfig, McpToolProvider};
use chromepilot_tools::ToolRegistry;
use tracing::info;

/// Data dir, then file config overlaid with the environment.
pub fn load_config() -> anyhow::Result<(Paths, Config)> {
    let paths = Paths::new();
    let config = Config::from_env(&paths)?;
    Ok((paths, config))
}

/// The DevTools URL to attach to, bootstrapping Chrome first when enabled.
pub async fn resolve_browser_url(config: &Config) -> anyhow::Result<String> {
    if !config.browser.auto_launch {
        return Ok(config.browser.browser_url());
    }
    let opts = ProbeOptions::from_config(&config.browser)?;
    let endpoint = ReadinessProber::new().ensure_ready(&opts).await?;
    Ok(endpoint.browser_url())
}

/// A running MCP server and the session driving it.
pub struct Runtime {
    pub mcp: Arc<McpClient>,
    pub session: SharedSession,
}

impl Runtime {
    pub async fn start(
        config: &Config,
        paths: &Paths,
        browser_url: &str,
        session_key: Option<&str>,
    ) -> anyhow::Result<Self> {
        let provider = Arc::new(OpenAIProvider::from_config(config)?);

        let server = McpServerConfig::from_config(&config.mcp, browser_url, &config.mcp.lang);
        let mcp = Arc::new(McpClient::start(&server).await?);

        let mut tools = ToolRegistry::new();
        tools.register_mcp_provider(&McpToolProvider::new(mcp.clone())).await;
        info!(count = tools.len(), "Browser tools registered");

        paths.ensure_dirs()?;
        let agent = Agent::from_defaults(&config.agent, provider, tools)
            .with_instructions(instructions_for(&paths.screenshots_dir()));

        let store = match session_key {
            Some(key) => StateStore::for_session(paths, key),
            None => StateStore::default_slot(paths),
        };
        let session = SharedSession::open(agent, store).await;

        Ok(Self { mcp, session })
    }
}
