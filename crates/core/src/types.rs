use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A tool call request that serializes to the OpenAI-compatible format:
/// `{id, type: "function", function: {name, arguments}}`
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl Serialize for ToolCallRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry(
            "function",
            &serde_json::json!({
                "name": self.name,
                "arguments": self.arguments.to_string()
            }),
        )?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ToolCallRequest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| serde::de::Error::custom("expected object"))?;

        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let func = obj
            .get("function")
            .and_then(|v| v.as_object())
            .ok_or_else(|| serde::de::Error::custom("missing function"))?;
        let name = func
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let arguments = match func.get("arguments") {
            Some(Value::String(s)) => parse_arguments(s),
            Some(v) => v.clone(),
            None => Value::Object(serde_json::Map::new()),
        };

        Ok(ToolCallRequest { id, name, arguments })
    }
}

/// Tool arguments arrive as a JSON string; a malformed one becomes `{}`.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, raw = %raw, "Failed to parse tool call arguments as JSON, using empty object");
        Value::Object(serde_json::Map::new())
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub usage: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn with_role(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Value::String(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: &str) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::with_role("assistant", content)
    }

    pub fn tool_result(tool_call_id: &str, name: &str, content: &str) -> Self {
        let mut msg = Self::with_role("tool", content);
        msg.tool_call_id = Some(tool_call_id.to_string());
        msg.name = Some(name.to_string());
        msg
    }

    /// Plain-text view of the content; empty for non-string payloads.
    pub fn text(&self) -> &str {
        self.content.as_str().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_openai_shape() {
        let call = ToolCallRequest {
            id: "call_1".to_string(),
            name: "navigate_page".to_string(),
            arguments: serde_json::json!({"url": "https://example.com"}),
        };
        let v = serde_json::to_value(&call).unwrap();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "navigate_page");
        assert_eq!(v["function"]["arguments"], r#"{"url":"https://example.com"}"#);

        let back: ToolCallRequest = serde_json::from_value(v).unwrap();
        assert_eq!(back, call);
    }

    #[test]
    fn test_malformed_arguments_become_empty_object() {
        let raw = serde_json::json!({
            "id": "c",
            "type": "function",
            "function": {"name": "click", "arguments": "{not json"}
        });
        let call: ToolCallRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(call.arguments, serde_json::json!({}));
    }

    #[test]
    fn test_tool_result_message() {
        let msg = ChatMessage::tool_result("call_9", "take_screenshot", "saved");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_9");
        assert_eq!(v["name"], "take_screenshot");
        assert!(v.get("tool_calls").is_none());
        assert_eq!(msg.text(), "saved");
    }
}
