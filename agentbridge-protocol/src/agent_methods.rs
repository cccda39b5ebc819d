//! Typed argument/result payloads for the RPC methods named in spec §6.1.
//!
//! The wire envelope ([`crate::frame::Frame`]) carries these as opaque `serde_json::Value`;
//! these types are what callers serialize into / deserialize out of that `Value`.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Gateway-callable agent methods
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadModelArgs {
    pub model_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_size: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadModelResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartModelArgs {
    pub model: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartModelResult {
    pub models: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelsResult {
    pub models: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadModelArgs {
    pub model_url: String,
    pub filename: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResult {
    pub status: String,
}

/// Args shared by `completion` and `chat` calls (spec §6.1 table).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationArgs {
    pub request_id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
}

// ---------------------------------------------------------------------------
// Agent-callable gateway methods
// ---------------------------------------------------------------------------

/// Sentinel chunk payload marking the end of a generation stream.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiveCompletionArgs {
    pub agent_id: String,
    pub request_id: String,
    pub data: serde_json::Value,
}

impl ReceiveCompletionArgs {
    /// True when `data` is the literal string `"[DONE]"` (terminal marker, spec §4.6/§6.1).
    pub fn is_done(&self) -> bool {
        self.data.as_str() == Some(DONE_MARKER)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentErrorArgs {
    pub agent_id: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_completion_recognizes_done_marker() {
        let args = ReceiveCompletionArgs {
            agent_id: "a1".into(),
            request_id: "r1".into(),
            data: serde_json::json!("[DONE]"),
        };
        assert!(args.is_done());

        let args = ReceiveCompletionArgs {
            agent_id: "a1".into(),
            request_id: "r1".into(),
            data: serde_json::json!({"choices": []}),
        };
        assert!(!args.is_done());
    }
}
