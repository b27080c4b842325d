//! Gateway error types and their HTTP mapping.
//!
//! Validation failures become `400`, everything that went wrong talking to
//! the child process becomes `500`. The body is always `{"error": "..."}`.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::calc::CalcError;
use crate::rpc::RpcError;
use crate::sql_guard::QueryRejection;

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No response arrived before the deadline.
    #[error("Request '{method}' timed out after {}s", .after.as_secs())]
    Timeout { method: String, after: Duration },

    /// The child exited (or was abandoned) while the request was in flight.
    #[error("Session lost: {0}")]
    SessionLost(String),

    /// The session did not become ready within the request's budget.
    #[error("Data-access server not ready after {}s", .0.as_secs())]
    NotReady(Duration),

    /// There is no child stdin to write to.
    #[error("Data-access server is not connected")]
    NotConnected,

    /// The child answered with a JSON-RPC error.
    #[error("Server error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    /// The child sent something well-formed but unusable.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Writing the request line to the child failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The correlator task is gone.
    #[error("Correlator stopped")]
    CorrelatorStopped,

    #[error("{0}")]
    InvalidQuery(#[from] QueryRejection),

    #[error("{0}")]
    InvalidExpression(#[from] CalcError),

    /// Malformed HTTP request body.
    #[error("{0}")]
    BadRequest(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidQuery(_)
            | GatewayError::InvalidExpression(_)
            | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
