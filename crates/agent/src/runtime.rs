use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chromepilot_core::config::AgentDefaults;
use chromepilot_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use chromepilot_core::{safe_truncate, Error, Result};
use chromepilot_providers::Provider;
use chromepilot_tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Tool output beyond this is cut before it goes back to the model.
const MAX_TOOL_RESULT_BYTES: usize = 64 * 1024;

/// `{screenshot_dir}` is replaced by [`instructions_for`].
pub const DEFAULT_INSTRUCTIONS: &str = r#"
You are a helpful AI assistant with browser automation capabilities via Chrome DevTools MCP.

Your primary role is to help users with:
1. **General conversation**: Answer questions, provide information, assist with various tasks
2. **Web browsing**: When users need to interact with websites, you can control Chrome browser

Browser Automation Guidelines (when needed):
- Use "navigate_page" to visit URLs
- Use "wait_for" to wait for page elements to load
- Use "fill" to enter text into input fields
- Use "click" to interact with page elements
- Use "take_screenshot" to capture the current page
  * **IMPORTANT**: ALWAYS use the filePath parameter when taking screenshots
  * Save screenshots to: {screenshot_dir}/screenshot-<timestamp>.png (use current timestamp)
  * Example filePath: "{screenshot_dir}/screenshot-20250101-153045.png"
  * After screenshot is saved, ALWAYS tell the user the complete file path
  * Example response: "已截圖完成，檔案儲存於：{screenshot_dir}/screenshot-20250101-153045.png"
- For Taiwanese users: prefer URLs with &hl=zh-TW&gl=TW parameters when applicable
- Handle cookie/consent dialogs appropriately
- Be patient with page loading and dynamic content

Important Rules:
- Only use browser tools when the user's request clearly requires web interaction
- For simple questions or conversations, respond directly without opening the browser
- Always explain what you're doing when using browser automation
- If a website requires specific actions (login, navigation), guide the user through it
- Summarize your actions and results clearly
- When taking screenshots, ALWAYS inform the user of the saved file location

Language Preference:
- Respond in Traditional Chinese (繁體中文) by default
- For web content, prefer Taiwan region settings when available
"#;

/// The default instructions with screenshots directed into `screenshot_dir`.
pub fn instructions_for(screenshot_dir: &Path) -> String {
    let dir = screenshot_dir.display().to_string();
    let dir = dir.trim_end_matches('/');
    let dir = if dir.is_empty() { "." } else { dir };
    DEFAULT_INSTRUCTIONS.replace("{screenshot_dir}", dir)
}

/// Everything needed to continue a conversation. Opaque to the state store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub final_output: String,
    pub state: RunState,
    pub tool_calls: usize,
}

/// Progress reported while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { turn: u32 },
    ToolStarted { name: String, arguments: Value },
    ToolFinished { name: String, success: bool },
}

impl AgentEvent {
    pub fn describe(&self) -> String {
        match self {
            AgentEvent::Thinking { turn } => format!("思考中（第 {} 回合）", turn),
            AgentEvent::ToolStarted { name, .. } => format!("執行工具：{}", name),
            AgentEvent::ToolFinished { name, success: true } => format!("工具完成：{}", name),
            AgentEvent::ToolFinished { name, success: false } => format!("工具失敗：{}", name),
        }
    }
}

pub struct Agent {
    name: String,
    model: String,
    instructions: String,
    max_turns: u32,
    llm_max_retries: u32,
    llm_retry_delay_ms: u64,
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry) -> Self {
        Self::from_defaults(&AgentDefaults::default(), provider, tools)
    }

    pub fn from_defaults(defaults: &AgentDefaults, provider: Arc<dyn Provider>, tools: ToolRegistry) -> Self {
        Self {
            name: defaults.name.clone(),
            model: defaults.model.clone(),
            instructions: instructions_for(Path::new("./storage")),
            max_turns: defaults.max_turns,
            llm_max_retries: defaults.llm_max_retries,
            llm_retry_delay_ms: defaults.llm_retry_delay_ms,
            provider,
            tools,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.llm_max_retries = max_retries;
        self.llm_retry_delay_ms = base_delay_ms;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one user input to completion, continuing from `state`.
    ///
    /// A turn is one model call. Tool failures are returned to the model as
    /// tool results; only model failures and running out of turns are errors.
    pub async fn run(
        &self,
        input: &str,
        state: Option<RunState>,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<RunResult> {
        let emit = |event: AgentEvent| {
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        };

        let prior = state.map(|s| s.messages).unwrap_or_default();
        let mut messages = Vec::with_capacity(prior.len() + 2);
        messages.push(ChatMessage::system(&self.instructions));
        messages.extend(prior);
        messages.push(ChatMessage::user(input));

        let schemas = self.tools.get_tool_schemas();
        let mut tool_calls = 0usize;
        info!(agent = %self.name, model = %self.model, history = messages.len() - 2, "Agent run started");

        for turn in 1..=self.max_turns {
            emit(AgentEvent::Thinking { turn });
            let response = self.call_llm(&messages, &schemas, turn).await?;

            info!(
                turn,
                content_len = response.content.as_ref().map(|c| c.len()).unwrap_or(0),
                tool_calls_count = response.tool_calls.len(),
                finish_reason = %response.finish_reason,
                "LLM response received"
            );

            if response.tool_calls.is_empty() {
                let final_output = response.content.unwrap_or_default();
                messages.push(ChatMessage::assistant(&final_output));
                let history = messages.split_off(1);
                return Ok(RunResult {
                    final_output,
                    state: RunState { messages: history },
                    tool_calls,
                });
            }

            let mut assistant_msg = ChatMessage::assistant(response.content.as_deref().unwrap_or(""));
            assistant_msg.tool_calls = Some(response.tool_calls.clone());
            messages.push(assistant_msg);

            for call in &response.tool_calls {
                tool_calls += 1;
                emit(AgentEvent::ToolStarted {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
                let (result, success) = self.execute_tool_call(call).await;
                emit(AgentEvent::ToolFinished {
                    name: call.name.clone(),
                    success,
                });
                messages.push(ChatMessage::tool_result(&call.id, &call.name, &result));
            }
        }

        warn!(max_turns = self.max_turns, "Reached max turns");
        Err(Error::MaxTurnsExceeded(self.max_turns))
    }

    async fn call_llm(&self, messages: &[ChatMessage], tools: &[Value], turn: u32) -> Result<LLMResponse> {
        let max_retries = self.llm_max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = self.llm_retry_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(attempt, max_retries, delay_ms, turn, "Retrying LLM call after error");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match self.provider.chat(messages, tools).await {
                Ok(r) => {
                    if attempt > 0 {
                        info!(attempt, turn, "LLM call succeeded after retry");
                    }
                    return Ok(r);
                }
                Err(e) => {
                    warn!(error = %e, attempt, max_retries, turn, "LLM call failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Provider("LLM call failed".to_string())))
    }

    async fn execute_tool_call(&self, call: &ToolCallRequest) -> (String, bool) {
        debug!(tool = %call.name, args = %call.arguments, "Executing tool call");
        match self.tools.execute(&call.name, call.arguments.clone()).await {
            Ok(Value::String(s)) => (clip(s), true),
            Ok(v) => (clip(v.to_string()), true),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                (format!("Error: {}", e), false)
            }
        }
    }
}

fn clip(mut s: String) -> String {
    if s.len() > MAX_TOOL_RESULT_BYTES {
        let keep = safe_truncate(&s, MAX_TOOL_RESULT_BYTES).len();
        s.truncate(keep);
        s.push_str("\n…(truncated)");
    }
    s
}
