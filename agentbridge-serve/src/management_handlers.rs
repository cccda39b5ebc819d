//! Management facade (spec C8, §1.2): agent visibility, model mapping CRUD, and the
//! download-model proxy, plus the supplemented `/health` and `/api/info` endpoints.

use std::sync::Arc;
use std::time::Duration;

use agentbridge_core::GatewayError;
use agentbridge_protocol::agent_methods::{DownloadModelArgs, StatusResult};
use agentbridge_protocol::ModelMapping;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error_response::ApiError;

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct InfoResponse {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub connected_agents: usize,
}

pub async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        connected_agents: state.registry.list().len(),
    })
}

#[derive(Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub installed_models: Vec<String>,
    pub loaded_models: Vec<String>,
    pub pending_requests: usize,
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentSummary>> {
    let agents = state
        .registry
        .list()
        .into_iter()
        .map(|a| AgentSummary {
            id: a.id,
            name: a.name,
            installed_models: a.installed_models.into_iter().collect(),
            loaded_models: a.loaded_models.into_iter().collect(),
            pending_requests: a.pending_requests,
        })
        .collect();
    Json(agents)
}

#[derive(Deserialize)]
pub struct DownloadModelRequest {
    pub model_url: String,
    pub filename: String,
}

pub async fn download_model(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(req): Json<DownloadModelRequest>,
) -> Response {
    match download_model_inner(state, agent_id, req).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn download_model_inner(
    state: Arc<AppState>,
    agent_id: String,
    req: DownloadModelRequest,
) -> Result<StatusResult, GatewayError> {
    let mux = state
        .mux_table
        .get(&agent_id)
        .map(|kv| kv.value().clone())
        .ok_or_else(|| GatewayError::InvalidRequest(format!("agent {agent_id:?} is not connected")))?;
    let args = serde_json::to_value(DownloadModelArgs {
        model_url: req.model_url,
        filename: req.filename,
    })
    .unwrap_or_default();
    let value = mux.call("downloadModel", args, Duration::from_millis(state.config.broker_deadline_ms)).await?;
    serde_json::from_value(value).map_err(|e| GatewayError::Internal(e.to_string()))
}

pub async fn list_mappings(State(state): State<Arc<AppState>>) -> Json<Vec<ModelMapping>> {
    let mappings = state
        .mapper
        .list()
        .into_iter()
        .map(|(public_name, internal_name)| ModelMapping {
            public_name,
            internal_name,
            created_at: chrono::Utc::now(),
        })
        .collect();
    Json(mappings)
}

#[derive(Deserialize)]
pub struct PutMappingRequest {
    pub public_name: String,
    pub internal_name: String,
}

pub async fn put_mapping(State(state): State<Arc<AppState>>, Json(req): Json<PutMappingRequest>) -> Response {
    match state
        .mapper
        .put(ModelMapping::new(req.public_name, req.internal_name))
        .await
    {
        Ok(()) => (axum::http::StatusCode::NO_CONTENT, ()).into_response(),
        Err(e) => ApiError(GatewayError::Internal(e.to_string())).into_response(),
    }
}

pub async fn delete_mapping(State(state): State<Arc<AppState>>, Path(public_name): Path<String>) -> Response {
    match state.mapper.delete(&public_name).await {
        Ok(()) => (axum::http::StatusCode::NO_CONTENT, ()).into_response(),
        Err(e) => ApiError(GatewayError::Internal(e.to_string())).into_response(),
    }
}
