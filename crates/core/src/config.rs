use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Explicit proxy for LLM calls. `None` follows HTTPS_PROXY/HTTP_PROXY.
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Left unset by default; some models only accept their own default.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_llm_retry_delay_ms")]
    pub llm_retry_delay_ms: u64,
}

fn default_agent_name() -> String {
    "Chrome Player".to_string()
}

fn default_model() -> String {
    "gpt-5-mini".to_string()
}

fn default_max_turns() -> u32 {
    25
}

fn default_llm_max_retries() -> u32 {
    2
}

fn default_llm_retry_delay_ms() -> u64 {
    2000
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            model: default_model(),
            max_turns: default_max_turns(),
            temperature: None,
            max_tokens: None,
            llm_max_retries: default_llm_max_retries(),
            llm_retry_delay_ms: default_llm_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_devtools_port")]
    pub devtools_port: u16,
    /// Isolated user-data dir; never the user's everyday Chrome profile.
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: String,
    #[serde(default = "default_profile_directory")]
    pub profile_directory: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Run the readiness prober before `chat` and `web` start the agent.
    #[serde(default = "default_auto_launch")]
    pub auto_launch: bool,
}

fn default_devtools_port() -> u16 {
    9222
}

fn default_user_data_dir() -> String {
    "~/.cache/chrome-mcp".to_string()
}

fn default_profile_directory() -> String {
    "Default".to_string()
}

fn default_channel() -> String {
    "stable".to_string()
}

fn default_ready_timeout_ms() -> u64 {
    15_000
}

fn default_auto_launch() -> bool {
    true
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            devtools_port: default_devtools_port(),
            user_data_dir: default_user_data_dir(),
            profile_directory: default_profile_directory(),
            channel: default_channel(),
            ready_timeout_ms: default_ready_timeout_ms(),
            auto_launch: default_auto_launch(),
        }
    }
}

impl BrowserConfig {
    pub fn user_data_dir_path(&self) -> PathBuf {
        expand_home(&self.user_data_dir)
    }

    pub fn browser_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.devtools_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    #[serde(default = "default_mcp_command")]
    pub command: String,
    #[serde(default = "default_mcp_package")]
    pub package: String,
    #[serde(default = "default_mcp_lang")]
    pub lang: String,
    #[serde(default = "default_cache_tools_list")]
    pub cache_tools_list: bool,
}

fn default_mcp_command() -> String {
    "npx".to_string()
}

fn default_mcp_package() -> String {
    "chrome-devtools-mcp@latest".to_string()
}

fn default_mcp_lang() -> String {
    "zh-TW".to_string()
}

fn default_cache_tools_list() -> bool {
    true
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: default_mcp_command(),
            package: default_mcp_package(),
            lang: default_mcp_lang(),
            cache_tools_list: default_cache_tools_list(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_host() -> String {
    "127.0.0.1".to_string()
}

fn default_web_port() -> u16 {
    3000
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub web: WebConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// File config overlaid with the process environment.
    pub fn from_env(paths: &Paths) -> Result<Self> {
        let mut config = Self::load_or_default(paths)?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an environment-like lookup. Blank values are
    /// ignored; unparseable numbers keep the current value.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.openai.api_base = v;
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.agent.model = v;
        }
        parse_into(&get, "MAX_TURNS", &mut self.agent.max_turns);
        parse_into(&get, "PORT", &mut self.web.port);
        if let Some(v) = get("HOST") {
            self.web.host = v;
        }
        parse_into(&get, "MCP_DEVTOOLS_PORT", &mut self.browser.devtools_port);
        if let Some(v) = get("MCP_USER_DATA_DIR") {
            self.browser.user_data_dir = v;
        }
        if let Some(v) = get("MCP_PROFILE_DIR") {
            self.browser.profile_directory = v;
        }
        if let Some(v) = get("MCP_CHROME_CHANNEL") {
            self.browser.channel = v;
        }
        parse_into(&get, "MCP_READY_TIMEOUT", &mut self.browser.ready_timeout_ms);
        parse_into(&get, "MCP_AUTO_LAUNCH", &mut self.browser.auto_launch);
        if let Some(v) = get("MCP_LANG") {
            self.mcp.lang = v;
        }
    }

    /// The credential `chat` and `web` cannot start without.
    pub fn require_api_key(&self) -> Result<&str> {
        let key = self.openai.api_key.trim();
        if key.is_empty() {
            return Err(Error::Config(
                "OPENAI_API_KEY is not set; add it to the environment or a .env file".to_string(),
            ));
        }
        Ok(key)
    }
}

fn parse_into<T, G>(get: &G, key: &str, target: &mut T)
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment value"),
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
