//! Public HTTP API of the gateway.
//!
//! Every proxied route takes the caller's identity from a trusted header set
//! by the front end, makes sure that user's agent is up, and relays the
//! request to the same path on the agent.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::OrchestratorError;
use crate::identity::{IdentityNormalizer, SanitizingNormalizer};
use crate::orchestrator::agent_manager::AgentManager;
use crate::orchestrator::proxy::{AgentProxy, ProxiedResponse};

/// Paths relayed to the agent unchanged, for every method.
pub const PROXIED_ROUTES: [&str; 5] = ["/chat", "/files", "/uploads", "/memory", "/conversations"];

/// Shared state for the gateway API.
#[derive(Clone)]
pub struct GatewayState {
    pub agents: Arc<AgentManager>,
    pub proxy: Arc<AgentProxy>,
    pub normalizer: Arc<dyn IdentityNormalizer>,
    /// Header carrying the raw user identity, as configured.
    pub identity_header: String,
}

impl GatewayState {
    pub fn new(
        agents: Arc<AgentManager>,
        proxy: Arc<AgentProxy>,
        identity_header: impl Into<String>,
    ) -> Self {
        Self {
            agents,
            proxy,
            normalizer: Arc::new(SanitizingNormalizer),
            identity_header: identity_header.into(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn IdentityNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }
}

pub struct GatewayApi;

impl GatewayApi {
    /// Build the router. Request bodies above `body_limit` bytes get a 413.
    pub fn router(state: GatewayState, body_limit: usize) -> Router {
        let mut router = Router::new().route("/health", get(health_check));
        for path in PROXIED_ROUTES {
            router = router.route(path, any(proxy_to_agent));
        }
        router
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve the API on `addr` until the listener fails.
    pub async fn start(
        state: GatewayState,
        addr: SocketAddr,
        body_limit: usize,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = Self::router(state, body_limit);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Gateway listening on {}", addr);
        axum::serve(listener, router).await?;
        Ok(())
    }
}

// -- Handlers --

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "gateway",
    })
}

async fn proxy_to_agent(
    State(state): State<GatewayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ProxiedResponse, OrchestratorError> {
    let raw = identity(&headers, &state.identity_header)?;
    let token = state.normalizer.normalize(raw);
    let body = request_body(&method, body)?;
    let name = state.agents.container_name(&token);

    let endpoint = state.agents.ensure_agent(&token).await.inspect_err(|e| {
        tracing::error!(container = %name, token = %token, error = %e, "Failed to ensure agent");
    })?;

    state
        .proxy
        .forward(&endpoint, &name, &token, method, uri.path(), body)
        .await
        .inspect_err(|e| {
            tracing::error!(container = %name, path = uri.path(), error = %e, "Proxy to agent failed");
        })
}

/// Raw identity from `header`. Missing, blank or non-UTF-8 values are
/// rejected before anything touches the runtime.
fn identity<'a>(headers: &'a HeaderMap, header: &str) -> Result<&'a str, OrchestratorError> {
    headers
        .get(header)
        .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OrchestratorError::MissingIdentity {
            header: header.to_string(),
        })
}

/// Body to forward. `GET`/`HEAD` carry none; an empty body on any other
/// method is sent as `{}`.
fn request_body(method: &Method, body: Bytes) -> Result<Option<Bytes>, OrchestratorError> {
    if *method == Method::GET || *method == Method::HEAD {
        return Ok(None);
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Some(Bytes::from_static(b"{}")));
    }
    serde_json::from_slice::<serde::de::IgnoredAny>(&body).map_err(|e| {
        OrchestratorError::InvalidBody {
            reason: e.to_string(),
        }
    })?;
    Ok(Some(body))
}
