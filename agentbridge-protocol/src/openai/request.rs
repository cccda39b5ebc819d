//! OpenAI-compatible request DTOs for `/v1/completions` and `/v1/chat/completions`.
//!
//! Field names and shapes match the [OpenAI API reference](https://platform.openai.com/docs/api-reference).
//! Message `content` can be a string or an array of parts (multimodal); both are accepted.

use serde::Deserialize;

fn default_true() -> bool {
    true
}

/// `POST /v1/chat/completions` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<serde_json::Value>,
    #[serde(default)]
    pub logit_bias: Option<serde_json::Value>,
    #[serde(default)]
    pub logprobs: Option<bool>,
}

/// A single chat message. `content` may be absent for assistant tool-call-only turns.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Message content: either a plain string or an array of multimodal parts.
///
/// Deserializes from `"hello"` or `[{"type":"text","text":"hello"}, ...]` so clients can
/// send either shape without a type error.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    String(String),
    Array(Vec<ContentPart>),
}

impl MessageContent {
    /// The text of this content: the string as-is, or the concatenation of all `text`
    /// parts (other part types, e.g. `image_url`, are skipped).
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::String(s) => s.clone(),
            MessageContent::Array(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: Option<String>,
    pub text: Option<String>,
}

/// `POST /v1/completions` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<serde_json::Value>,
    #[serde(default)]
    pub logit_bias: Option<serde_json::Value>,
    #[serde(default)]
    pub logprobs: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_content_text_string() {
        let c = MessageContent::String("hi".to_string());
        assert_eq!(c.as_text(), "hi");
    }

    #[test]
    fn message_content_text_array_joins_text_parts() {
        let json = r#"[{"type":"text","text":"hello "},{"type":"image_url","image_url":{"url":"x"}},{"type":"text","text":"world"}]"#;
        let c: MessageContent = serde_json::from_str(json).unwrap();
        assert_eq!(c.as_text(), "hello world");
    }

    #[test]
    fn chat_request_defaults_stream_true() {
        let json = r#"{"model":"m1","messages":[{"role":"user","content":"hi"}]}"#;
        let req: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert!(req.stream);
        assert_eq!(req.messages.len(), 1);
    }
}
