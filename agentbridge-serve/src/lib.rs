//! OpenAI-compatible HTTP facade, management facade, and agent WebSocket transport
//! (spec C1, C7, C8, C9) wired on top of `agentbridge-core`/`agentbridge-protocol`.
//!
//! **Public API**: [`run_gateway`], [`run_gateway_on_listener`].

mod app;
mod error_response;
mod management_handlers;
mod openai_handlers;
mod rate_limit;
mod ws;

use std::sync::Arc;

use agentbridge_config::Config;
use agentbridge_core::{AgentRegistry, GatewayError, NameMapper, Store};
use tokio::net::TcpListener;
use tracing::info;

pub use app::{router, AppState};

/// Binds `config.host:config.port`, then delegates to [`run_gateway_on_listener`].
pub async fn run_gateway(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "agentbridge gateway listening");
    run_gateway_on_listener(listener, config).await
}

/// Runs the gateway on an already-bound listener (used directly by tests that bind
/// `127.0.0.1:0` to get an ephemeral port before starting the server).
pub async fn run_gateway_on_listener(
    listener: TcpListener,
    config: Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = Arc::new(Store::new(&config.database_path)?);
    let registry = Arc::new(AgentRegistry::new());
    let mapper = Arc::new(NameMapper::new(store.clone()).await?);
    let state = Arc::new(AppState::new(config, registry, mapper, store));

    let app = router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

/// Waits for SIGINT or (on unix) SIGTERM, then drains in-flight work (spec C9):
/// fails every still-open broker with `server_shutdown` and closes every agent
/// connection with a normal close code before letting axum finish shutting down.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining in-flight requests");
    for entry in state.brokers.iter() {
        entry.value().fail(GatewayError::ServerShutdown);
    }
    state.brokers.clear();
    for agent in state.registry.list() {
        if let Some(handle) = state.registry.handle(&agent.id) {
            let _ = handle.close();
        }
    }
}
