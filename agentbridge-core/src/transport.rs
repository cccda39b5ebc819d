//! Decouples the registry/broker from the concrete WebSocket implementation: anything
//! that can accept outbound [`Frame`]s for one agent connection.

use agentbridge_protocol::Frame;
use tokio::sync::mpsc;

/// One item on an agent's outbound queue: either an application frame or a request to
/// close the underlying connection (spec C9 graceful shutdown: "close agent connections
/// with a normal close code").
#[derive(Clone, Debug)]
pub enum OutboundMessage {
    Frame(Frame),
    Close,
}

/// A handle bound to one agent's outbound send task. Cloneable, so both the registry
/// and any in-flight broker holding a reference to the agent can push frames without
/// fighting over ownership of the connection.
#[derive(Clone)]
pub struct AgentHandle {
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

impl AgentHandle {
    pub fn new(sender: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { sender }
    }

    /// Queues a frame for delivery. Fails only once the agent's receive task has torn
    /// down (same failure the teacher's connection write-loop treats as "client gone").
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.sender
            .send(OutboundMessage::Frame(frame))
            .map_err(|_| SendError::Closed)
    }

    /// Requests a normal-close of the underlying connection.
    pub fn close(&self) -> Result<(), SendError> {
        self.sender.send(OutboundMessage::Close).map_err(|_| SendError::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Closed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent connection closed")
    }
}

impl std::error::Error for SendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_after_receiver_dropped_is_closed_err() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = AgentHandle::new(tx);
        drop(rx);
        let err = handle
            .send(Frame::notify(None, "ping", serde_json::json!({})))
            .unwrap_err();
        assert_eq!(err, SendError::Closed);
    }

    #[test]
    fn close_after_receiver_dropped_is_closed_err() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = AgentHandle::new(tx);
        drop(rx);
        assert_eq!(handle.close().unwrap_err(), SendError::Closed);
    }
}
