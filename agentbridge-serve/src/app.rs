//! Axum app: shared state and router wiring for the OpenAI facade, the management
//! facade, and the agent WebSocket endpoint.

use std::sync::Arc;
use std::time::Instant;

use agentbridge_config::Config;
use agentbridge_core::{AgentRegistry, NameMapper, RequestBroker, RpcMultiplexer, Store};
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use dashmap::DashMap;
use tower_http::cors::{Any, CorsLayer};

use crate::management_handlers;
use crate::openai_handlers;
use crate::rate_limit::RateLimiter;
use crate::ws::ws_handler;

pub struct AppState {
    pub config: Config,
    pub registry: Arc<AgentRegistry>,
    pub mapper: Arc<NameMapper>,
    pub store: Arc<Store>,
    pub mux_table: DashMap<String, Arc<RpcMultiplexer>>,
    pub brokers: DashMap<String, Arc<RequestBroker>>,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, registry: Arc<AgentRegistry>, mapper: Arc<NameMapper>, store: Arc<Store>) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_max);
        Self {
            config,
            registry,
            mapper,
            store,
            mux_table: DashMap::new(),
            brokers: DashMap::new(),
            rate_limiter,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = match state.config.cors_origin.as_str() {
        "*" => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
        origin => match HeaderValue::from_str(origin) {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
        },
    };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(management_handlers::health))
        .route("/api/info", get(management_handlers::info))
        .route("/v1/chat/completions", post(openai_handlers::chat_completions))
        .route("/v1/completions", post(openai_handlers::completions))
        .route("/v1/models", get(openai_handlers::list_models))
        .route("/management/agents", get(management_handlers::list_agents))
        .route(
            "/management/agents/:agent_id/models/download",
            post(management_handlers::download_model),
        )
        .route(
            "/management/mappings",
            get(management_handlers::list_mappings).post(management_handlers::put_mapping),
        )
        .route(
            "/management/mappings/:public_name",
            delete(management_handlers::delete_mapping),
        )
        .layer(cors)
        .with_state(state)
}
