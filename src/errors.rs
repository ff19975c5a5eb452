//! Error taxonomy for Jarvis.
//!
//! Mirrors the kind table in the service's error-handling design: each
//! variant names the component that raises it and the way it is surfaced
//! over HTTP when it escapes all the way to a handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JarvisError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("failed to connect to {host}: {reason}")]
    SshConnect { host: String, reason: String },

    #[error("command timed out on {host} after {timeout_s}s")]
    CommandTimeout { host: String, timeout_s: u64 },

    /// The connection to `host` was fine and the command ran to completion,
    /// but it exited non-zero. Distinct from [`JarvisError::SshConnect`] and
    /// `Other`'s transport failures: spec §4.4 retries connection-layer
    /// errors only, never a command's own exit status.
    #[error("command on {host} exited with status {exit_status}: {stderr}")]
    CommandFailed { host: String, exit_status: i32, stderr: String },

    #[error("command rejected: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("no safe plan could be produced")]
    NoSafePlan,

    #[error("llm error: {0}")]
    LlmError(String),

    #[error("host {0} is offline")]
    HostOffline(String),

    #[error("a self-restart handoff is already active")]
    HandoffConflict,

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("authentication failed")]
    Auth,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for JarvisError {
    fn from(err: sqlx::Error) -> Self {
        JarvisError::StoreUnavailable(err.to_string())
    }
}

impl JarvisError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            JarvisError::Auth => StatusCode::UNAUTHORIZED,
            JarvisError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            JarvisError::HandoffConflict => StatusCode::CONFLICT,
            JarvisError::NotFound | JarvisError::UnknownHost(_) => StatusCode::NOT_FOUND,
            JarvisError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for JarvisError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!(error = %self, "request failed");
        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
