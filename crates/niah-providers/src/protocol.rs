use serde::{Deserialize, Serialize};
use serde_json::Value;

use niah_core::{ChatMessage, Role};

// ---------------------------------------------------------------------------
// OpenAI-style chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

// ---------------------------------------------------------------------------
// Anthropic-style messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct MessagesRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// Self-hosted generation endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub penalty: f32,
}

/// Pull the completion out of a generation endpoint reply.
///
/// Accepts a bare JSON string or an object with `response`, `text` or
/// `output`.
pub fn generated_text(body: &Value) -> Option<String> {
    match body {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["response", "text", "output"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_text_shapes() {
        assert_eq!(generated_text(&json!("hi")).as_deref(), Some("hi"));
        assert_eq!(
            generated_text(&json!({"response": "a", "text": "b"})).as_deref(),
            Some("a")
        );
        assert_eq!(generated_text(&json!({"output": "c"})).as_deref(), Some("c"));
        assert_eq!(generated_text(&json!({"response": 3})), None);
        assert_eq!(generated_text(&json!([1, 2])), None);
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("u")];
        let req = ChatRequest {
            model: "gpt-4",
            messages: &messages,
            max_tokens: 300,
            temperature: 0.0,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "u");
        assert_eq!(value["max_tokens"], 300);
    }
}
