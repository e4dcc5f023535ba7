pub mod client;
pub mod openai;

use async_trait::async_trait;
use chromepilot_core::types::{ChatMessage, LLMResponse};
use chromepilot_core::Result;
use serde_json::Value;

#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

pub use client::build_http_client;
pub use openai::OpenAIProvider;
