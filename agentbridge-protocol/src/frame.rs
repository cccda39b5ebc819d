//! Agent WebSocket RPC frame envelope (spec §4.2, §6.1).
//!
//! One JSON object per WebSocket text frame. `type` selects the variant; field names are
//! shared across both call directions so the same envelope works for gateway→agent calls,
//! agent→gateway calls, and agent→gateway push notifications.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlates a `call` with its `result`/`error`, and a streaming `notify` with its call.
pub type CallId = Uuid;

/// One RPC error, carried inside an `error` frame or as an outbound-call failure.
#[derive(Clone, Debug, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RpcError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

/// Frame envelope exchanged over the agent WebSocket.
///
/// Each variant maps to a JSON object with `"type": "<variant_name>"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// A request expecting exactly one `Result` or `Error` reply, in either direction.
    Call {
        id: CallId,
        method: String,
        args: serde_json::Value,
    },
    /// Successful reply to a `Call`.
    Result { id: CallId, value: serde_json::Value },
    /// Failed reply to a `Call`.
    Error { id: CallId, error: RpcError },
    /// Fire-and-forget push; no reply is expected. Used for streaming chunks
    /// (`receiveCompletion`) and for the gateway→agent cancel signal.
    Notify {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<CallId>,
        method: String,
        args: serde_json::Value,
    },
}

impl Frame {
    pub fn call(id: CallId, method: impl Into<String>, args: serde_json::Value) -> Self {
        Frame::Call {
            id,
            method: method.into(),
            args,
        }
    }

    pub fn result(id: CallId, value: serde_json::Value) -> Self {
        Frame::Result { id, value }
    }

    pub fn error(id: CallId, error: RpcError) -> Self {
        Frame::Error { id, error }
    }

    pub fn notify(id: Option<CallId>, method: impl Into<String>, args: serde_json::Value) -> Self {
        Frame::Notify {
            id,
            method: method.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_roundtrip() {
        let id = Uuid::nil();
        let frame = Frame::call(id, "startModel", serde_json::json!({"model": "m1"}));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"call\""));
        assert!(json.contains("\"method\":\"startModel\""));
        let parsed: Frame = serde_json::from_str(&json).unwrap();
        match parsed {
            Frame::Call { method, args, .. } => {
                assert_eq!(method, "startModel");
                assert_eq!(args["model"], "m1");
            }
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn notify_without_id_roundtrip() {
        let frame = Frame::notify(None, "error", serde_json::json!({"error": "boom"}));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("\"id\""));
        let parsed: Frame = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Frame::Notify { id: None, .. }));
    }

    #[test]
    fn error_roundtrip_carries_code() {
        let id = Uuid::new_v4();
        let frame = Frame::error(id, RpcError::with_code("timed out", "call_timeout"));
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: Frame = serde_json::from_str(&json).unwrap();
        match parsed {
            Frame::Error { error, .. } => {
                assert_eq!(error.code.as_deref(), Some("call_timeout"));
            }
            _ => panic!("expected Error"),
        }
    }

    #[test]
    fn malformed_frame_fails_to_parse() {
        let result: Result<Frame, _> = serde_json::from_str("{\"type\":\"bogus\"}");
        assert!(result.is_err());
    }
}
