//! Non-streaming (buffered) response envelopes and the `/v1/models` listing.

use serde::Serialize;

use super::chunk::ChunkUsage;

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionResponseChoice>,
    pub usage: ChunkUsage,
}

impl ChatCompletionResponse {
    pub const OBJECT: &'static str = "chat.completion";

    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        choices: Vec<ChatCompletionResponseChoice>,
        usage: ChunkUsage,
    ) -> Self {
        Self {
            id: id.into(),
            object: Self::OBJECT,
            created: now_secs(),
            model: model.into(),
            choices,
            usage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponseChoice {
    pub index: u32,
    pub message: ChatResponseMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponseMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CompletionResponseChoice>,
    pub usage: ChunkUsage,
}

impl CompletionResponse {
    pub const OBJECT: &'static str = "text_completion";

    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        choices: Vec<CompletionResponseChoice>,
        usage: ChunkUsage,
    ) -> Self {
        Self {
            id: id.into(),
            object: Self::OBJECT,
            created: now_secs(),
            model: model.into(),
            choices,
            usage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponseChoice {
    pub index: u32,
    pub text: String,
    pub finish_reason: String,
}

/// `GET /v1/models` response (spec §6.2).
#[derive(Debug, Clone, Serialize)]
pub struct ModelsListResponse {
    pub object: &'static str,
    pub data: Vec<ModelObject>,
}

impl ModelsListResponse {
    pub fn new(data: Vec<ModelObject>) -> Self {
        Self { object: "list", data }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub owned_by: String,
}

impl ModelObject {
    pub fn new(public_name: impl Into<String>) -> Self {
        Self {
            id: public_name.into(),
            object: "model",
            created: now_secs(),
            owned_by: "agentbridge".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_list_wraps_models_in_list_object() {
        let resp = ModelsListResponse::new(vec![ModelObject::new("gpt-local")]);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"object\":\"list\""));
        assert!(json.contains("\"id\":\"gpt-local\""));
    }

    #[test]
    fn chat_response_has_chat_completion_object() {
        let resp = ChatCompletionResponse::new(
            "cmpl-1",
            "m1",
            vec![ChatCompletionResponseChoice {
                index: 0,
                message: ChatResponseMessage {
                    role: "assistant".into(),
                    content: "hi".into(),
                },
                finish_reason: "stop".into(),
            }],
            ChunkUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            },
        );
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"object\":\"chat.completion\""));
    }
}
