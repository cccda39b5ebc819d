//! RPC multiplexer (spec C2): correlates outbound `call` frames sent to one agent with
//! their `result`/`error` reply, across however many calls are in flight on that
//! connection at once.

use std::time::Duration;

use agentbridge_protocol::{CallId, Frame, RpcError};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::transport::AgentHandle;

type PendingCall = oneshot::Sender<Result<Value, RpcError>>;

/// One multiplexer per agent connection. The connection's receive loop feeds `Result`/
/// `Error` frames into [`RpcMultiplexer::complete`]; everything else (`call`, `notify`)
/// goes out through the bound [`AgentHandle`].
pub struct RpcMultiplexer {
    pending: DashMap<CallId, PendingCall>,
    handle: AgentHandle,
}

impl RpcMultiplexer {
    pub fn new(handle: AgentHandle) -> Self {
        Self {
            pending: DashMap::new(),
            handle,
        }
    }

    /// Sends a `call` frame and awaits its reply, bounded by `timeout`. On timeout the
    /// pending entry is removed so a late reply is silently dropped rather than
    /// delivered to a caller who already gave up.
    pub async fn call(&self, method: &str, args: Value, timeout: Duration) -> Result<Value, GatewayError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.handle.send(Frame::call(id, method, args)).is_err() {
            self.pending.remove(&id);
            return Err(GatewayError::AgentDisconnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(rpc_err))) => Err(GatewayError::Internal(rpc_err.message)),
            Ok(Err(_recv_dropped)) => Err(GatewayError::AgentDisconnected),
            Err(_elapsed) => {
                self.pending.remove(&id);
                Err(GatewayError::AgentTimeout)
            }
        }
    }

    /// Sends a one-way notification; no reply is awaited.
    pub fn notify(&self, method: &str, args: Value) -> Result<(), GatewayError> {
        self.handle
            .send(Frame::notify(None, method, args))
            .map_err(|_| GatewayError::AgentDisconnected)
    }

    /// Routes an inbound `Result`/`Error` frame to its waiting caller. Returns `true` if
    /// a pending call was found (callers can log unmatched replies as a protocol warning).
    pub fn complete(&self, id: CallId, result: Result<Value, RpcError>) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Fails every outstanding call, e.g. when the underlying connection has closed.
    pub fn fail_all(&self, error: RpcError) {
        let ids: Vec<CallId> = self.pending.iter().map(|kv| *kv.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::transport::OutboundMessage;

    fn handle_and_rx() -> (AgentHandle, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AgentHandle::new(tx), rx)
    }

    async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Frame {
        match rx.recv().await.unwrap() {
            OutboundMessage::Frame(frame) => frame,
            OutboundMessage::Close => panic!("expected frame, got close"),
        }
    }

    #[tokio::test]
    async fn call_completed_by_matching_result_frame() {
        let (handle, mut rx) = handle_and_rx();
        let mux = RpcMultiplexer::new(handle);

        let call_fut = mux.call("listModels", serde_json::json!({}), Duration::from_secs(1));
        let respond_fut = async {
            let sent = recv_frame(&mut rx).await;
            let id = match sent {
                Frame::Call { id, .. } => id,
                _ => panic!("expected call frame"),
            };
            assert!(mux.complete(id, Ok(serde_json::json!({"models": ["m1"]}))));
        };

        let (result, _) = tokio::join!(call_fut, respond_fut);
        assert_eq!(result.unwrap()["models"][0], "m1");
    }

    #[tokio::test]
    async fn call_times_out_when_no_reply_arrives() {
        let (handle, _rx) = handle_and_rx();
        let mux = RpcMultiplexer::new(handle);
        let err = mux
            .call("listModels", serde_json::json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AgentTimeout));
    }

    #[tokio::test]
    async fn call_fails_immediately_when_connection_already_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mux = RpcMultiplexer::new(AgentHandle::new(tx));
        let err = mux
            .call("listModels", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AgentDisconnected));
    }

    #[tokio::test]
    async fn fail_all_resolves_every_pending_call_with_error() {
        let (handle, mut rx) = handle_and_rx();
        let mux = RpcMultiplexer::new(handle);
        let call_fut = mux.call("chat", serde_json::json!({}), Duration::from_secs(1));
        let trigger_fut = async {
            let _ = recv_frame(&mut rx).await;
            mux.fail_all(RpcError::new("agent disconnected"));
        };

        let (result, _) = tokio::join!(call_fut, trigger_fut);
        assert!(matches!(result.unwrap_err(), GatewayError::Internal(_)));
    }

    #[test]
    fn complete_with_unknown_id_returns_false() {
        let (handle, _rx) = handle_and_rx();
        let mux = RpcMultiplexer::new(handle);
        assert!(!mux.complete(Uuid::new_v4(), Ok(Value::Null)));
    }
}
