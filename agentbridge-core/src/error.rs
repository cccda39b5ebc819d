//! Gateway error taxonomy (spec §7): every externally-visible failure maps to an
//! OpenAI-shaped error envelope and an HTTP status; a few are internal-only bookkeeping
//! errors that never reach a client and carry no status.

use agentbridge_protocol::openai::OpenAiErrorBody;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("no agent available for model {0:?}")]
    NoAgentAvailable(String),

    #[error("agent call timed out")]
    AgentTimeout,

    #[error("agent disconnected mid-request")]
    AgentDisconnected,

    #[error("internal error: {0}")]
    Internal(String),

    /// Agent rejected or failed the `startModel` call (spec §7 `model_load_failed`).
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    /// No chunks arrived before `[DONE]` in buffered mode (spec §4.6 `empty_response`).
    #[error("agent produced no chunks before completion")]
    EmptyResponse,

    /// HTTP client disconnected before the broker reached a terminal state. Never
    /// written to a response body (the client is gone), only logged.
    #[error("client cancelled the request")]
    ClientCancelled,

    /// Process is shutting down; in-flight brokers are failed with this (spec §4.9).
    #[error("server is shutting down")]
    ServerShutdown,

    /// Broker state-machine misuse: a terminal event arrived for a broker that was
    /// already finalized. Logged, never surfaced to the HTTP client.
    #[error("broker {0} already finalized")]
    BrokerAlreadyFinalized(String),
}

impl GatewayError {
    /// `None` means this error is internal bookkeeping and has no client-facing status.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GatewayError::InvalidRequest(_) => Some(400),
            GatewayError::Unauthorized => Some(401),
            GatewayError::RateLimited => Some(429),
            GatewayError::NoAgentAvailable(_) => Some(503),
            GatewayError::AgentTimeout => Some(504),
            GatewayError::AgentDisconnected => Some(503),
            GatewayError::Internal(_) => Some(500),
            GatewayError::ModelLoadFailed(_) => Some(503),
            GatewayError::EmptyResponse => Some(500),
            GatewayError::ServerShutdown => Some(503),
            GatewayError::ClientCancelled => None,
            GatewayError::BrokerAlreadyFinalized(_) => None,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::Unauthorized => "authentication_error",
            GatewayError::RateLimited => "rate_limit_exceeded",
            GatewayError::NoAgentAvailable(_) => "service_unavailable_error",
            GatewayError::AgentTimeout => "timeout_error",
            GatewayError::AgentDisconnected => "service_unavailable_error",
            GatewayError::Internal(_) => "internal_error",
            GatewayError::ModelLoadFailed(_) => "service_unavailable_error",
            GatewayError::EmptyResponse => "internal_error",
            GatewayError::ServerShutdown => "service_unavailable_error",
            GatewayError::ClientCancelled => "internal_error",
            GatewayError::BrokerAlreadyFinalized(_) => "internal_error",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Unauthorized => "invalid_api_key",
            GatewayError::RateLimited => "rate_limit_exceeded",
            GatewayError::NoAgentAvailable(_) => "no_available_agents",
            GatewayError::AgentTimeout => "timeout",
            GatewayError::AgentDisconnected => "agent_disconnected",
            GatewayError::Internal(_) => "server_error",
            GatewayError::ModelLoadFailed(_) => "model_load_failed",
            GatewayError::EmptyResponse => "empty_response",
            GatewayError::ServerShutdown => "server_shutdown",
            GatewayError::ClientCancelled => "client_cancelled",
            GatewayError::BrokerAlreadyFinalized(_) => "internal_error",
        }
    }

    /// Renders this error into the OpenAI error envelope shape, for the errors that are
    /// ever sent to an HTTP client. Internal-only errors still render (callers log them
    /// raw instead) but should never be routed to `status_code` callers.
    pub fn to_openai_body(&self) -> OpenAiErrorBody {
        OpenAiErrorBody::new(self.to_string(), self.error_type(), self.code())
    }
}
