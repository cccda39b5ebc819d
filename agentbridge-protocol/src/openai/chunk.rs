//! Streaming SSE chunk shape for `/v1/chat/completions` and `/v1/completions`.
//!
//! Mirrors the `chat.completion.chunk`/`text_completion` chunk object OpenAI emits on
//! `data: <json>\n\n` lines, terminated by a literal `data: [DONE]\n\n`.

use serde::{Deserialize, Serialize};

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChunkUsage>,
}

impl ChatCompletionChunk {
    pub const OBJECT: &'static str = "chat.completion.chunk";

    pub fn new(id: impl Into<String>, model: impl Into<String>, choices: Vec<ChunkChoice>) -> Self {
        Self {
            id: id.into(),
            object: Self::OBJECT,
            created: now_secs(),
            model: model.into(),
            choices,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: ChunkUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// `data: <json>\n\n` line ready to write onto an SSE response body.
    pub fn to_sse_line(&self) -> String {
        format!("data: {}\n\n", serde_json::to_string(self).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaToolCall {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<DeltaToolCallFunction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaToolCallFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The literal terminating line of an SSE stream (spec §6.2).
pub const SSE_DONE_LINE: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CompletionChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChunkUsage>,
}

impl CompletionChunk {
    pub const OBJECT: &'static str = "text_completion";

    pub fn new(id: impl Into<String>, model: impl Into<String>, choices: Vec<CompletionChunkChoice>) -> Self {
        Self {
            id: id.into(),
            object: Self::OBJECT,
            created: now_secs(),
            model: model.into(),
            choices,
            usage: None,
        }
    }

    pub fn to_sse_line(&self) -> String {
        format!("data: {}\n\n", serde_json::to_string(self).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChunkChoice {
    pub index: u32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}
