//! Error types for the gateway.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors reported by a container runtime backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("No such container or network: {name}")]
    NotFound { name: String },

    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("Failed to connect to container runtime: {reason}")]
    Connect { reason: String },

    #[error("Container runtime API error: {reason}")]
    Api { reason: String },
}

/// Errors surfaced while ensuring an agent and proxying to it.
///
/// `Clone` because a single spawn result is handed to every request that
/// was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{header} header required")]
    MissingIdentity { header: String },

    #[error("invalid JSON body: {reason}")]
    InvalidBody { reason: String },

    #[error("Failed to provision workspace for {token}: {reason}")]
    Provision { token: String, reason: String },

    #[error("Agent {name} did not become healthy within {timeout_ms}ms")]
    HealthTimeout { name: String, timeout_ms: u64 },

    #[error("Container runtime call {operation} failed: {reason}")]
    Runtime { operation: String, reason: String },

    #[error("Spawn of {name} aborted: {reason}")]
    SpawnAborted { name: String, reason: String },

    #[error("Agent {name} unreachable: {reason}")]
    UpstreamUnreachable { name: String, reason: String },
}

impl OrchestratorError {
    pub(crate) fn runtime(operation: &str, err: RuntimeError) -> Self {
        Self::Runtime {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }

    /// HTTP status the gateway answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingIdentity { .. } | Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::Provision { .. }
            | Self::HealthTimeout { .. }
            | Self::Runtime { .. }
            | Self::SpawnAborted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// True for failures of the spawn sequence, as opposed to request
    /// validation or a proxy call to an already healthy agent.
    pub fn is_spawn_failure(&self) -> bool {
        self.status_code() == StatusCode::SERVICE_UNAVAILABLE
    }
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::MissingIdentity { .. } => serde_json::json!({ "error": self.to_string() }),
            Self::InvalidBody { reason } => serde_json::json!({
                "error": "invalid JSON body",
                "details": reason,
            }),
            Self::UpstreamUnreachable { .. } => serde_json::json!({
                "error": "Agent unreachable",
                "details": self.to_string(),
            }),
            _ => serde_json::json!({
                "error": "Agent unavailable",
                "details": self.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
