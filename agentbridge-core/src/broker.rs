//! Request broker (spec C6): one instance per inflight completion/chat request. Owns
//! the state machine (`NEW → LOADING → INVOKED → FINALISED`, or `FAILED` from any
//! non-terminal state) and the chunk sink (SSE forwarding or buffered assembly), and
//! guarantees the agent's pending-request counter is decremented exactly once no
//! matter which path the request finishes on.
//!
//! Modeled on the run-task / mpsc-channel / exactly-once-terminal-event pattern this
//! codebase already uses for streaming agent output to a client.

use std::sync::{Arc, Mutex};

use agentbridge_protocol::openai::{
    ChatCompletionResponse, ChatCompletionResponseChoice, ChatResponseMessage, ChunkUsage,
    CompletionResponse, CompletionResponseChoice,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::GatewayError;
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    New,
    Loading,
    Invoked,
    Finalised,
    Failed,
}

impl BrokerState {
    fn is_terminal(self) -> bool {
        matches!(self, BrokerState::Finalised | BrokerState::Failed)
    }

    fn can_advance_to(self, next: BrokerState) -> bool {
        use BrokerState::*;
        match (self, next) {
            (New, Loading) => true,
            (Loading, Invoked) => true,
            (Invoked, Finalised) => true,
            (New, Invoked) => true, // model already loaded, startModel call skipped
            (s, Failed) if !s.is_terminal() => true,
            _ => false,
        }
    }
}

/// Which OpenAI request shape this broker is assembling a response for (spec §4.6
/// buffered-mode assembly rules differ between the two).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Completion,
    Chat,
}

/// Where chunks go as they arrive from the agent.
pub enum ChunkSink {
    /// SSE mode: each chunk is forwarded verbatim as a `data: ...\n\n` line.
    Streaming(mpsc::UnboundedSender<String>),
    /// Buffered mode: content deltas are concatenated and the final JSON envelope is
    /// assembled once the stream completes (spec §4.6 buffered assembly rules).
    Buffered(Mutex<Option<oneshot::Sender<Result<Value, GatewayError>>>>, Mutex<BufferedState>),
}

#[derive(Default)]
pub struct BufferedState {
    content: String,
    usage: Option<ChunkUsage>,
    role: String,
    finish_reason: String,
    tool_calls: Option<Value>,
    chunk_count: usize,
}

pub struct RequestBroker {
    pub request_id: String,
    pub agent_id: String,
    pub model: String,
    pub kind: RequestKind,
    state: Mutex<BrokerState>,
    sink: ChunkSink,
    registry: Arc<AgentRegistry>,
    pending_decremented: Mutex<bool>,
}

impl RequestBroker {
    pub fn new_streaming(
        request_id: String,
        agent_id: String,
        model: String,
        kind: RequestKind,
        registry: Arc<AgentRegistry>,
        tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            request_id,
            agent_id,
            model,
            kind,
            state: Mutex::new(BrokerState::New),
            sink: ChunkSink::Streaming(tx),
            registry,
            pending_decremented: Mutex::new(false),
        }
    }

    pub fn new_buffered(
        request_id: String,
        agent_id: String,
        model: String,
        kind: RequestKind,
        registry: Arc<AgentRegistry>,
        tx: oneshot::Sender<Result<Value, GatewayError>>,
    ) -> Self {
        Self {
            request_id,
            agent_id,
            model,
            kind,
            state: Mutex::new(BrokerState::New),
            sink: ChunkSink::Buffered(Mutex::new(Some(tx)), Mutex::new(BufferedState::default())),
            registry,
            pending_decremented: Mutex::new(false),
        }
    }

    pub fn state(&self) -> BrokerState {
        *self.state.lock().unwrap()
    }

    /// Advances the state machine. Invalid transitions (e.g. a second terminal event)
    /// are logged and ignored rather than panicking — matches the teacher's tolerance
    /// of late/duplicate agent notifications.
    pub fn transition(&self, next: BrokerState) {
        let mut state = self.state.lock().unwrap();
        if state.can_advance_to(next) {
            *state = next;
        } else {
            tracing::warn!(
                request_id = %self.request_id,
                from = ?*state,
                to = ?next,
                "ignoring invalid broker state transition"
            );
        }
    }

    /// Forwards one non-terminal chunk from the agent.
    pub fn push_chunk(&self, data: Value) {
        match &self.sink {
            ChunkSink::Streaming(tx) => {
                let line = format!("data: {data}\n\n");
                let _ = tx.send(line);
            }
            ChunkSink::Buffered(_, buffered) => {
                let mut buffered = buffered.lock().unwrap();
                buffered.chunk_count += 1;
                match self.kind {
                    RequestKind::Chat => {
                        if let Some(delta) = data["choices"][0]["delta"].as_object() {
                            if let Some(role) = delta.get("role").and_then(|v| v.as_str()) {
                                buffered.role = role.to_string();
                            }
                            if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
                                buffered.content.push_str(content);
                            }
                            if let Some(tool_calls) = delta.get("tool_calls") {
                                if tool_calls.as_array().is_some_and(|a| !a.is_empty()) {
                                    buffered.tool_calls = Some(tool_calls.clone());
                                }
                            }
                        }
                    }
                    RequestKind::Completion => {
                        if let Some(text) = data["choices"][0]["text"].as_str() {
                            buffered.content.push_str(text);
                        }
                    }
                }
                if let Some(reason) = data["choices"][0]["finish_reason"].as_str() {
                    buffered.finish_reason = reason.to_string();
                }
                if let Some(usage) = data.get("usage") {
                    if let Ok(usage) = serde_json::from_value::<ChunkUsage>(usage.clone()) {
                        buffered.usage = Some(usage);
                    }
                }
            }
        }
    }

    /// Terminal success: `[DONE]` was received. Closes the SSE stream or assembles and
    /// delivers the buffered response. Exactly-once: a second call is a no-op.
    pub fn finish(&self) {
        if !self.mark_finalised_once() {
            return;
        }
        match &self.sink {
            ChunkSink::Streaming(tx) => {
                let _ = tx.send(agentbridge_protocol::openai::SSE_DONE_LINE.to_string());
            }
            ChunkSink::Buffered(tx, buffered) => {
                let buffered = buffered.lock().unwrap();
                if buffered.chunk_count == 0 {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(Err(GatewayError::EmptyResponse));
                    }
                    self.decrement_pending_once();
                    return;
                }
                let finish_reason = if buffered.finish_reason.is_empty() {
                    "stop".to_string()
                } else {
                    buffered.finish_reason.clone()
                };
                let usage = buffered.usage.unwrap_or(ChunkUsage {
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    total_tokens: 0,
                });
                let response = match self.kind {
                    RequestKind::Chat => {
                        let message = ChatResponseMessage {
                            role: if buffered.role.is_empty() {
                                "assistant".to_string()
                            } else {
                                buffered.role.clone()
                            },
                            content: buffered.content.clone(),
                        };
                        let mut value = serde_json::to_value(ChatCompletionResponse::new(
                            format!("chatcmpl-{}", self.request_id),
                            self.model.clone(),
                            vec![ChatCompletionResponseChoice {
                                index: 0,
                                message,
                                finish_reason,
                            }],
                            usage,
                        ))
                        .unwrap_or(Value::Null);
                        if let Some(tool_calls) = &buffered.tool_calls {
                            value["choices"][0]["message"]["tool_calls"] = tool_calls.clone();
                        }
                        value
                    }
                    RequestKind::Completion => serde_json::to_value(CompletionResponse::new(
                        format!("cmpl-{}", self.request_id),
                        self.model.clone(),
                        vec![CompletionResponseChoice {
                            index: 0,
                            text: buffered.content.clone(),
                            finish_reason,
                        }],
                        usage,
                    ))
                    .unwrap_or(Value::Null),
                };
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(Ok(response));
                }
            }
        }
        self.decrement_pending_once();
    }

    /// Terminal failure: propagates `err` to the client and decrements pending exactly
    /// once, regardless of how many times this is called or from which state.
    pub fn fail(&self, err: GatewayError) {
        if !self.mark_failed_once() {
            return;
        }
        match &self.sink {
            ChunkSink::Streaming(tx) => {
                let body = err.to_openai_body();
                let line = format!("data: {}\n\n", serde_json::to_string(&body).unwrap_or_default());
                let _ = tx.send(line);
                let _ = tx.send(agentbridge_protocol::openai::SSE_DONE_LINE.to_string());
            }
            ChunkSink::Buffered(tx, _) => {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(Err(err));
                }
            }
        }
        self.decrement_pending_once();
    }

    fn mark_finalised_once(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return false;
        }
        *state = BrokerState::Finalised;
        true
    }

    fn mark_failed_once(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return false;
        }
        *state = BrokerState::Failed;
        true
    }

    fn decrement_pending_once(&self) {
        let mut decremented = self.pending_decremented.lock().unwrap();
        if !*decremented {
            self.registry.decrement_pending(&self.agent_id);
            self.registry.unbind_request(&self.request_id);
            *decremented = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::mpsc as tmpsc;

    fn registry_with_agent() -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new());
        let (tx, _rx) = tmpsc::unbounded_channel();
        registry
            .register(
                "a1".into(),
                "one".into(),
                HashSet::new(),
                crate::transport::AgentHandle::new(tx),
            )
            .unwrap();
        registry.increment_pending("a1");
        registry
    }

    #[tokio::test]
    async fn streaming_broker_forwards_chunks_then_done() {
        let registry = registry_with_agent();
        let (tx, mut rx) = tmpsc::unbounded_channel();
        let broker = RequestBroker::new_streaming(
            "r1".into(),
            "a1".into(),
            "m1".into(),
            RequestKind::Chat,
            registry.clone(),
            tx,
        );
        broker.transition(BrokerState::Loading);
        broker.transition(BrokerState::Invoked);
        broker.push_chunk(serde_json::json!({"choices":[{"delta":{"content":"hi"}}]}));
        broker.finish();

        let first = rx.recv().await.unwrap();
        assert!(first.contains("\"content\":\"hi\""));
        let second = rx.recv().await.unwrap();
        assert_eq!(second, agentbridge_protocol::openai::SSE_DONE_LINE);
        assert_eq!(broker.state(), BrokerState::Finalised);
        assert_eq!(registry.snapshot("a1").unwrap().pending_requests, 0);
    }

    #[tokio::test]
    async fn buffered_broker_assembles_final_chat_response() {
        let registry = registry_with_agent();
        let (tx, rx) = oneshot::channel();
        let broker = RequestBroker::new_buffered("r1".into(), "a1".into(), "m1".into(), RequestKind::Chat, registry, tx);
        broker.push_chunk(serde_json::json!({"choices":[{"delta":{"role":"assistant","content":"hel"}}]}));
        broker.push_chunk(serde_json::json!({"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}));
        broker.finish();

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["message"]["content"], "hello");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn buffered_broker_assembles_final_completion_response() {
        let registry = registry_with_agent();
        let (tx, rx) = oneshot::channel();
        let broker = RequestBroker::new_buffered(
            "r1".into(),
            "a1".into(),
            "m1".into(),
            RequestKind::Completion,
            registry,
            tx,
        );
        broker.push_chunk(serde_json::json!({"choices":[{"text":"hel"}]}));
        broker.push_chunk(serde_json::json!({"choices":[{"text":"lo","finish_reason":"stop"}]}));
        broker.finish();

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["object"], "text_completion");
        assert_eq!(value["choices"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn buffered_broker_captures_tool_calls() {
        let registry = registry_with_agent();
        let (tx, rx) = oneshot::channel();
        let broker = RequestBroker::new_buffered("r1".into(), "a1".into(), "m1".into(), RequestKind::Chat, registry, tx);
        broker.push_chunk(serde_json::json!({"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"f","arguments":"{}"}}]}}]}));
        broker.push_chunk(serde_json::json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]}));
        broker.finish();

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["choices"][0]["message"]["tool_calls"][0]["id"], "call_1");
    }

    #[tokio::test]
    async fn no_chunks_before_done_is_empty_response() {
        let registry = registry_with_agent();
        let (tx, rx) = oneshot::channel();
        let broker = RequestBroker::new_buffered("r1".into(), "a1".into(), "m1".into(), RequestKind::Chat, registry, tx);
        broker.finish();
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::EmptyResponse));
    }

    #[tokio::test]
    async fn second_terminal_call_is_ignored() {
        let registry = registry_with_agent();
        let (tx, mut rx) = tmpsc::unbounded_channel();
        let broker = RequestBroker::new_streaming(
            "r1".into(),
            "a1".into(),
            "m1".into(),
            RequestKind::Chat,
            registry.clone(),
            tx,
        );
        broker.finish();
        broker.fail(GatewayError::AgentTimeout); // must be a no-op: already terminal
        let _ = rx.recv().await.unwrap(); // the DONE line from finish()
        assert!(rx.try_recv().is_err()); // nothing else was sent
        assert_eq!(registry.snapshot("a1").unwrap().pending_requests, 0);
    }

    #[tokio::test]
    async fn fail_sends_error_envelope_and_closes_stream() {
        let registry = registry_with_agent();
        let (tx, mut rx) = tmpsc::unbounded_channel();
        let broker = RequestBroker::new_streaming("r1".into(), "a1".into(), "m1".into(), RequestKind::Chat, registry, tx);
        broker.fail(GatewayError::AgentTimeout);
        let err_line = rx.recv().await.unwrap();
        assert!(err_line.contains("timeout_error"));
        let done_line = rx.recv().await.unwrap();
        assert_eq!(done_line, agentbridge_protocol::openai::SSE_DONE_LINE);
    }
}
