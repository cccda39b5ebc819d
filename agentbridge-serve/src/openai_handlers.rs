//! OpenAI-compatible facade (spec C7): `/v1/chat/completions`, `/v1/completions`,
//! `/v1/models`. Validates request parameters, resolves the public model name, picks
//! an agent through the router, drives the agent through the broker state machine, and
//! renders either an SSE stream or a buffered JSON response.

use std::sync::Arc;
use std::time::Duration;

use agentbridge_core::{select_agent, BrokerState, GatewayError, RequestBroker, RequestKind, RpcMultiplexer};
use agentbridge_protocol::agent_methods::{GenerationArgs, StartModelArgs, StartModelResult};
use agentbridge_protocol::openai::{
    ChatCompletionRequest, CompletionRequest, ModelObject, ModelsListResponse,
};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::app::AppState;
use crate::error_response::ApiError;
use crate::rate_limit::client_key;

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = &state.config.api_key else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

fn check_rate_limit(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    if state.rate_limiter.allow(&client_key(headers)) {
        Ok(())
    } else {
        Err(GatewayError::RateLimited)
    }
}

fn validate_range(value: Option<f32>, field: &str, min: f32, max: f32) -> Result<(), GatewayError> {
    match value {
        Some(v) if v < min || v > max => Err(GatewayError::InvalidRequest(format!(
            "{field} must be between {min} and {max}, got {v}"
        ))),
        _ => Ok(()),
    }
}

fn validate_n(n: Option<u32>) -> Result<(), GatewayError> {
    match n {
        Some(v) if !(1..=10).contains(&v) => {
            Err(GatewayError::InvalidRequest(format!("n must be between 1 and 10, got {v}")))
        }
        _ => Ok(()),
    }
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    match chat_completions_inner(state, &headers, req).await {
        Ok(resp) => resp,
        Err(e) => ApiError(e).into_response(),
    }
}

async fn chat_completions_inner(
    state: Arc<AppState>,
    headers: &HeaderMap,
    req: ChatCompletionRequest,
) -> Result<Response, GatewayError> {
    authenticate(&state, headers)?;
    check_rate_limit(&state, headers)?;
    validate_range(req.temperature, "temperature", 0.0, 2.0)?;
    validate_range(req.top_p, "top_p", 0.0, 1.0)?;
    validate_range(req.presence_penalty, "presence_penalty", -2.0, 2.0)?;
    validate_range(req.frequency_penalty, "frequency_penalty", -2.0, 2.0)?;
    validate_n(req.n)?;
    if req.messages.is_empty() {
        return Err(GatewayError::InvalidRequest("messages must not be empty".to_string()));
    }

    let request_id = Uuid::new_v4().to_string();
    let internal_model = state.mapper.resolve(&req.model);
    let messages = serde_json::json!(req
        .messages
        .iter()
        .map(|m| serde_json::json!({
            "role": m.role,
            "content": m.content.as_ref().map(|c| c.as_text()).unwrap_or_default(),
        }))
        .collect::<Vec<_>>());

    let args = GenerationArgs {
        request_id: request_id.clone(),
        model: internal_model.clone(),
        prompt: None,
        messages: Some(messages),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop.clone(),
        stream: Some(req.stream),
        logit_bias: req.logit_bias.clone(),
        logprobs: req.logprobs,
    };

    dispatch_generation(state, request_id, internal_model, "chat", RequestKind::Chat, args, req.stream).await
}

pub async fn completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CompletionRequest>,
) -> Response {
    match completions_inner(state, &headers, req).await {
        Ok(resp) => resp,
        Err(e) => ApiError(e).into_response(),
    }
}

async fn completions_inner(
    state: Arc<AppState>,
    headers: &HeaderMap,
    req: CompletionRequest,
) -> Result<Response, GatewayError> {
    authenticate(&state, headers)?;
    check_rate_limit(&state, headers)?;
    validate_range(req.temperature, "temperature", 0.0, 2.0)?;
    validate_range(req.top_p, "top_p", 0.0, 1.0)?;
    validate_range(req.presence_penalty, "presence_penalty", -2.0, 2.0)?;
    validate_range(req.frequency_penalty, "frequency_penalty", -2.0, 2.0)?;
    validate_n(req.n)?;
    if req.prompt.is_empty() {
        return Err(GatewayError::InvalidRequest("prompt must not be empty".to_string()));
    }

    let request_id = Uuid::new_v4().to_string();
    let internal_model = state.mapper.resolve(&req.model);
    let args = GenerationArgs {
        request_id: request_id.clone(),
        model: internal_model.clone(),
        prompt: Some(req.prompt.clone()),
        messages: None,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop.clone(),
        stream: Some(req.stream),
        logit_bias: req.logit_bias.clone(),
        logprobs: req.logprobs,
    };

    dispatch_generation(state, request_id, internal_model, "completion", RequestKind::Completion, args, req.stream).await
}

/// Picks an agent, loads the model if needed, kicks off the generation call, and
/// returns either an SSE stream response or awaits the buffered assembly.
///
/// Spawns three tasks that race to produce the broker's single terminal event (spec
/// §4.6/§5): the generation task itself, a deadline watchdog, and (streaming only) a
/// client-disconnect watcher. Whichever fires first wins; `RequestBroker`'s terminal
/// flag makes every later one a no-op.
async fn dispatch_generation(
    state: Arc<AppState>,
    request_id: String,
    internal_model: String,
    method: &'static str,
    kind: RequestKind,
    args: GenerationArgs,
    stream: bool,
) -> Result<Response, GatewayError> {
    let agents = state.registry.list();
    let selected = select_agent(&agents, &internal_model)
        .ok_or_else(|| GatewayError::NoAgentAvailable(internal_model.clone()))?;
    let agent_id = selected.id.clone();
    let already_loaded = selected.loaded_models.contains(&internal_model);

    let mux = state
        .mux_table
        .get(&agent_id)
        .map(|kv| kv.value().clone())
        .ok_or(GatewayError::AgentDisconnected)?;

    state.registry.increment_pending(&agent_id);
    state.registry.bind_request(request_id.clone(), agent_id.clone());

    let deadline = Duration::from_millis(state.config.broker_deadline_ms);

    if stream {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let broker = Arc::new(RequestBroker::new_streaming(
            request_id.clone(),
            agent_id.clone(),
            internal_model.clone(),
            kind,
            state.registry.clone(),
            tx.clone(),
        ));
        state.brokers.insert(request_id.clone(), broker.clone());
        spawn_generation_task(
            state.clone(),
            broker.clone(),
            mux.clone(),
            agent_id.clone(),
            already_loaded,
            internal_model.clone(),
            method,
            args,
            deadline,
            request_id.clone(),
        );
        spawn_deadline_watchdog(state.clone(), broker.clone(), mux.clone(), request_id.clone(), deadline);
        spawn_disconnect_watcher(state.clone(), broker.clone(), mux, request_id.clone(), tx);
        let body = Body::from_stream(UnboundedReceiverStream::new(rx).map(|line| Ok::<_, std::io::Error>(line)));
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("x-request-id", request_id)
            .body(body)
            .unwrap());
    }

    let (tx, rx) = oneshot::channel();
    let broker = Arc::new(RequestBroker::new_buffered(
        request_id.clone(),
        agent_id.clone(),
        internal_model.clone(),
        kind,
        state.registry.clone(),
        tx,
    ));
    state.brokers.insert(request_id.clone(), broker.clone());
    spawn_generation_task(
        state.clone(),
        broker.clone(),
        mux.clone(),
        agent_id.clone(),
        already_loaded,
        internal_model.clone(),
        method,
        args,
        deadline,
        request_id.clone(),
    );
    spawn_deadline_watchdog(state.clone(), broker, mux, request_id.clone(), deadline);
    let result = rx.await.map_err(|_| GatewayError::AgentDisconnected).and_then(|r| r);
    state.brokers.remove(&request_id);
    let result = result?;
    let mut response = Json(result).into_response();
    response.headers_mut().insert("x-request-id", request_id.parse().unwrap());
    Ok(response)
}

#[allow(clippy::too_many_arguments)]
fn spawn_generation_task(
    state: Arc<AppState>,
    broker: Arc<RequestBroker>,
    mux: Arc<RpcMultiplexer>,
    agent_id: String,
    already_loaded: bool,
    model: String,
    method: &'static str,
    args: GenerationArgs,
    deadline: Duration,
    request_id: String,
) {
    tokio::spawn(async move {
        if !already_loaded {
            broker.transition(BrokerState::Loading);
            let start_args = serde_json::to_value(StartModelArgs { model: model.clone() }).unwrap_or_default();
            match mux.call("startModel", start_args, deadline).await {
                Ok(value) => match serde_json::from_value::<StartModelResult>(value) {
                    Ok(result) => {
                        for loaded in &result.models {
                            state.registry.add_loaded(&agent_id, loaded);
                        }
                    }
                    Err(e) => {
                        broker.fail(GatewayError::ModelLoadFailed(e.to_string()));
                        state.brokers.remove(&request_id);
                        return;
                    }
                },
                Err(e) => {
                    broker.fail(GatewayError::ModelLoadFailed(e.to_string()));
                    state.brokers.remove(&request_id);
                    return;
                }
            }
        }
        broker.transition(BrokerState::Invoked);
        let call_args = serde_json::to_value(&args).unwrap_or_default();
        if let Err(e) = mux.call(method, call_args, deadline).await {
            broker.fail(e);
            state.brokers.remove(&request_id);
        }
    });
}

/// Fails the broker with `timeout` and best-effort notifies the agent to abort
/// generation once `deadline` elapses without a terminal event (spec §4.6 timeout).
/// Also removes the broker from the process-wide stream table so a timed-out request
/// doesn't leave its `call_id` entry behind (spec §4.3 testable property P7).
fn spawn_deadline_watchdog(
    state: Arc<AppState>,
    broker: Arc<RequestBroker>,
    mux: Arc<RpcMultiplexer>,
    request_id: String,
    deadline: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        if matches!(broker.state(), BrokerState::Finalised | BrokerState::Failed) {
            return;
        }
        broker.fail(GatewayError::AgentTimeout);
        state.brokers.remove(&request_id);
        let _ = mux.notify("cancel", serde_json::json!({ "request_id": request_id }));
    });
}

/// Detects an HTTP client disconnect (the SSE body's receiver is dropped) and fails
/// the broker with `client_cancelled`, notifying the agent to abort (spec §4.6/§5
/// cancellation). Also removes the broker from the stream table, same as the deadline
/// watchdog, so a cancelled stream doesn't leak its entry either.
fn spawn_disconnect_watcher(
    state: Arc<AppState>,
    broker: Arc<RequestBroker>,
    mux: Arc<RpcMultiplexer>,
    request_id: String,
    tx: mpsc::UnboundedSender<String>,
) {
    tokio::spawn(async move {
        tx.closed().await;
        if matches!(broker.state(), BrokerState::Finalised | BrokerState::Failed) {
            return;
        }
        broker.fail(GatewayError::ClientCancelled);
        state.brokers.remove(&request_id);
        let _ = mux.notify("cancel", serde_json::json!({ "request_id": request_id }));
    });
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsListResponse> {
    let mut seen = std::collections::HashSet::new();
    let mut models = Vec::new();
    for agent in state.registry.list() {
        for internal in agent.installed_models {
            let public_name = state.mapper.internal_to_public(&internal);
            if seen.insert(public_name.clone()) {
                models.push(ModelObject::new(public_name));
            }
        }
    }
    Json(ModelsListResponse::new(models))
}
