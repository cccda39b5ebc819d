//! Renders a [`GatewayError`] into an OpenAI-shaped HTTP error response.

use agentbridge_core::GatewayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code().unwrap_or(500);
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_openai_body())).into_response()
    }
}
