use std::time::Duration;

use chromepilot_core::config::expand_home;
use chromepilot_tools::browser::{ProbeOptions, ReadinessProber, ReadyEndpoint};
use serde_json::json;
use tracing::info;

use super::load_config;

/// Command-line values taking precedence over config and environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub user_data_dir: Option<String>,
    pub profile_directory: Option<String>,
    pub timeout_ms: Option<u64>,
    pub channel: Option<String>,
}

impl Overrides {
    fn apply(self, opts: &mut ProbeOptions) -> anyhow::Result<()> {
        if let Some(port) = self.port {
            opts.port = port;
        }
        if let Some(dir) = self.user_data_dir {
            opts.user_data_dir = expand_home(&dir);
        }
        if let Some(profile) = self.profile_directory {
            opts.profile_directory = profile;
        }
        if let Some(ms) = self.timeout_ms {
            opts.timeout = Duration::from_millis(ms);
        }
        if let Some(channel) = self.channel {
            opts.channel = channel.parse()?;
        }
        Ok(())
    }
}

pub async fn run(overrides: Overrides) -> anyhow::Result<()> {
    let (_, config) = load_config()?;
    let mut opts = ProbeOptions::from_config(&config.browser)?;
    overrides.apply(&mut opts)?;

    info!(
        port = opts.port,
        user_data_dir = %opts.user_data_dir.display(),
        profile = %opts.profile_directory,
        timeout_ms = opts.timeout.as_millis() as u64,
        "Bootstrapping Chrome for MCP"
    );

    let endpoint = ReadinessProber::new().ensure_ready(&opts).await?;
    println!("{}", serde_json::to_string_pretty(&summary(&endpoint))?);
    println!(
        "Attach an MCP server with --browserUrl={}",
        endpoint.browser_url()
    );
    Ok(())
}

fn summary(endpoint: &ReadyEndpoint) -> serde_json::Value {
    json!({
        "Browser": endpoint.version.browser,
        "ProtocolVersion": endpoint.version.protocol_version,
        "WebSocketDebuggerUrl": endpoint.version.web_socket_debugger_url,
    })
}
