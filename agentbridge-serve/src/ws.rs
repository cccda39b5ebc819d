//! Agent WebSocket connection lifecycle (spec C1): upgrade, registration, the frame
//! recv loop, and cleanup on disconnect.
//!
//! Grounded on this codebase's own `handle_socket`/`send_response` pattern: a plain
//! `while let Some(res) = socket.recv().await` loop, except agents speak the RPC frame
//! envelope instead of the tagged client/server request protocol, and the socket is
//! split so outbound frames (calls, notifies, replies) can be queued from other tasks
//! (the OpenAI facade handlers) via an mpsc channel rather than writing inline.

use std::collections::HashSet;
use std::sync::Arc;

use agentbridge_core::transport::OutboundMessage;
use agentbridge_core::{AgentHandle, GatewayError, RpcMultiplexer};
use agentbridge_protocol::{agent_methods::ReceiveCompletionArgs, AgentErrorArgs, Frame, RpcError};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::app::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let agent_id = match headers.get("agent-id").and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return ws.on_upgrade(close_with_policy_violation),
    };
    let agent_name = match headers.get("agent-name").and_then(|v| v.to_str().ok()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return ws.on_upgrade(close_with_policy_violation),
    };
    let installed_models: HashSet<String> = headers
        .get("agent-installed-models")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(|m| m.trim().to_string()).filter(|m| !m.is_empty()).collect())
        .unwrap_or_default();

    if let Some(secret) = &state.config.agent_secret_key {
        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(secret.as_str()) {
            return (StatusCode::UNAUTHORIZED, "invalid agent secret").into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_agent_socket(socket, state, agent_id, agent_name, installed_models))
}

/// Missing `agent-id`/`agent-name` headers (spec §4.1). The handshake already upgraded
/// to a WebSocket by the time headers are validated, so rejection is a close frame
/// rather than an HTTP status.
async fn close_with_policy_violation(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: 1008,
            reason: "policy_violation".into(),
        })))
        .await;
}

async fn handle_agent_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    agent_id: String,
    agent_name: String,
    installed_models: HashSet<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let handle = AgentHandle::new(tx);

    if let Err(e) = state
        .registry
        .register(agent_id.clone(), agent_name.clone(), installed_models, handle.clone())
    {
        tracing::warn!(agent_id = %agent_id, error = %e, "rejecting agent connection");
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "policy_violation".into(),
            })))
            .await;
        return;
    }
    tracing::info!(agent_id = %agent_id, agent_name = %agent_name, "agent connected");
    let _ = state.store.upsert_agent(agent_id.clone(), agent_name.clone(), Utc::now()).await;

    let mux = Arc::new(RpcMultiplexer::new(handle));
    state.mux_table.insert(agent_id.clone(), mux.clone());

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            match msg {
                OutboundMessage::Frame(frame) => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to serialize outbound frame");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                OutboundMessage::Close => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "server_shutdown".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    while let Some(res) = ws_rx.next().await {
        let msg = match res {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "read error, closing connection");
                break;
            }
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: Frame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "malformed frame, dropping");
                continue;
            }
        };
        handle_inbound_frame(&state, &mux, &agent_id, frame).await;
    }

    tracing::info!(agent_id = %agent_id, "agent disconnected");
    send_task.abort();
    state.mux_table.remove(&agent_id);
    mux.fail_all(RpcError::new("agent disconnected"));
    let orphaned_requests = state.registry.remove(&agent_id);
    for request_id in orphaned_requests {
        if let Some((_, broker)) = state.brokers.remove(&request_id) {
            broker.fail(GatewayError::AgentDisconnected);
        }
    }
}

async fn handle_inbound_frame(state: &Arc<AppState>, mux: &Arc<RpcMultiplexer>, agent_id: &str, frame: Frame) {
    match frame {
        Frame::Result { id, value } => {
            mux.complete(id, Ok(value));
        }
        Frame::Error { id, error } => {
            mux.complete(id, Err(error));
        }
        Frame::Notify { method, args, .. } => handle_notify(state, agent_id, &method, args).await,
        Frame::Call { id, method, .. } => {
            if let Some(handle) = state.registry.handle(agent_id) {
                let _ = handle.send(Frame::error(id, RpcError::new(format!("unsupported method: {method}"))));
            }
        }
    }
}

async fn handle_notify(state: &Arc<AppState>, agent_id: &str, method: &str, args: serde_json::Value) {
    state.registry.touch(agent_id);
    match method {
        "receiveCompletion" => {
            let args: ReceiveCompletionArgs = match serde_json::from_value(args) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(agent_id, error = %e, "malformed receiveCompletion notify");
                    return;
                }
            };
            let Some(broker) = state.brokers.get(&args.request_id).map(|kv| kv.value().clone()) else {
                tracing::warn!(agent_id, request_id = %args.request_id, "receiveCompletion for unknown request");
                return;
            };
            if args.is_done() {
                broker.finish();
                state.brokers.remove(&args.request_id);
            } else {
                broker.push_chunk(args.data);
            }
        }
        "agentError" => {
            let args: AgentErrorArgs = match serde_json::from_value(args) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(agent_id, error = %e, "malformed agentError notify");
                    return;
                }
            };
            // agentError does not name the request explicitly in all agent implementations,
            // so it is only actionable when it happens to match a still-pending broker; the
            // gateway still logs it either way for operator visibility.
            tracing::warn!(agent_id, error = %args.error, "agent reported an error");
        }
        other => {
            tracing::warn!(agent_id, method = other, "unrecognized notify method, ignoring");
        }
    }
}
