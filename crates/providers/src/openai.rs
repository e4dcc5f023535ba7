use async_trait::async_trait;
use chromepilot_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use chromepilot_core::{safe_truncate, Config, Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::client::build_http_client;
use crate::Provider;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, model: &str) -> Self {
        Self::new_with_proxy(api_key, api_base, model, None)
    }

    pub fn new_with_proxy(api_key: &str, api_base: Option<&str>, model: &str, proxy: Option<&str>) -> Self {
        let resolved_base = api_base
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        Self {
            client: build_http_client(proxy, Duration::from_secs(120)),
            api_key: api_key.to_string(),
            api_base: resolved_base,
            model: model.to_string(),
            max_tokens: None,
            temperature: None,
        }
    }

    /// Provider for the configured model. Fails without an API key.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?;
        let mut provider = Self::new_with_proxy(
            api_key,
            Some(&config.openai.api_base),
            &config.agent.model,
            config.openai.proxy.as_deref(),
        );
        provider.max_tokens = config.agent.max_tokens;
        provider.temperature = config.agent.temperature;
        Ok(provider)
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_request(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);

        let request = ChatRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
            max_completion_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        info!(url = %url, model = %self.model, tools_count = tools.len(), messages_count = messages.len(), "Calling LLM");

        let request_body = serde_json::to_string(&request)
            .map_err(|e| Error::Provider(format!("Failed to serialize request: {}", e)))?;
        debug!(body_len = request_body.len(), "Request body prepared");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(request_body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "LLM API error");
            return Err(Error::Provider(format!("API error {}: {}", status, raw_body)));
        }

        let preview = safe_truncate(&raw_body, 500);
        debug!(body_len = raw_body.len(), preview = %preview, "LLM raw response");

        serde_json::from_str(&raw_body)
            .map_err(|e| Error::Provider(format!("Failed to parse response: {}. Body: {}", e, preview)))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

fn no_tools(tools: &&[Value]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallRequest>>,
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse> {
        let chat_response = self.send_request(messages, tools).await?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("No choices in response".to_string()))?;

        let tool_calls = choice.message.tool_calls.unwrap_or_default();
        let content = choice.message.content.filter(|c| !c.is_empty());
        if !tool_calls.is_empty() {
            info!(count = tool_calls.len(), "LLM requested tool calls");
        }

        Ok(LLMResponse {
            content,
            tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: chat_response.usage.unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Option<(String, Value)>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn capturing_router(captured: Captured, reply: Value) -> Router {
        Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                let reply = reply.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    *captured.lock().unwrap() = Some((auth, body));
                    Json(reply)
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_native_tool_call_round() {
        let captured: Captured = Arc::default();
        let reply = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "navigate_page", "arguments": "{\"url\":\"https://example.com\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"total_tokens": 42}
        });
        let base = serve(capturing_router(captured.clone(), reply)).await;
        let provider = OpenAIProvider::new("sk-test", Some(&base), "gpt-5-mini");

        let tools = vec![json!({"type": "function", "function": {"name": "navigate_page"}})];
        let resp = provider
            .chat(&[ChatMessage::system("sys"), ChatMessage::user("go")], &tools)
            .await
            .unwrap();

        assert!(resp.content.is_none());
        assert_eq!(resp.finish_reason, "tool_calls");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "navigate_page");
        assert_eq!(resp.tool_calls[0].arguments["url"], "https://example.com");

        let (auth, body) = captured.lock().unwrap().take().unwrap();
        assert_eq!(auth, "Bearer sk-test");
        assert_eq!(body["model"], "gpt-5-mini");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"][1]["content"], "go");
        assert!(body.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_plain_text_without_tools() {
        let captured: Captured = Arc::default();
        let reply = json!({"choices": [{"message": {"content": "你好"}, "finish_reason": "stop"}]});
        let base = serve(capturing_router(captured.clone(), reply)).await;
        let provider = OpenAIProvider::new("k", Some(&format!("{}/", base)), "m").with_temperature(Some(0.5));

        let resp = provider.chat(&[ChatMessage::user("hi")], &[]).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("你好"));
        assert!(resp.tool_calls.is_empty());

        let (_, body) = captured.lock().unwrap().take().unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["temperature"], 0.5);
    }

    #[tokio::test]
    async fn test_error_status_is_provider_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key").into_response() }),
        );
        let base = serve(router).await;
        let provider = OpenAIProvider::new("k", Some(&base), "m");

        let err = provider.chat(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Provider(_)));
        assert!(msg.contains("401") && msg.contains("bad key"), "{msg}");
    }

    #[tokio::test]
    async fn test_unparseable_body_preview_is_cut_on_char_boundary() {
        // 3-byte chars put byte 500 inside a character.
        let body = "回".repeat(300);
        let router = Router::new().route("/v1/chat/completions", post(move || async move { body }));
        let base = serve(router).await;
        let provider = OpenAIProvider::new("k", Some(&base), "m");

        let err = provider.chat(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        let Error::Provider(msg) = err else { panic!("expected provider error") };
        let shown = msg.split("Body: ").nth(1).unwrap();
        assert_eq!(shown, "回".repeat(166));
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut cfg = Config::default();
        assert!(matches!(OpenAIProvider::from_config(&cfg), Err(Error::Config(_))));
        cfg.openai.api_key = "sk".to_string();
        cfg.openai.api_base = "http://relay.local/v1/".to_string();
        let p = OpenAIProvider::from_config(&cfg).unwrap();
        assert_eq!(p.api_base, "http://relay.local/v1");
        assert_eq!(p.model(), "gpt-5-mini");
    }
}
