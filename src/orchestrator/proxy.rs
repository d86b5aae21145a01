//! Forwards a user's request to their agent and relays the answer.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::OrchestratorError;
use crate::identity::UserToken;
use crate::orchestrator::agent_manager::AgentEndpoint;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upstream status and body, relayed as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            self.body,
        )
            .into_response()
    }
}

/// HTTP client for agent calls.
///
/// No overall request timeout: agent turns can legitimately take minutes.
pub struct AgentProxy {
    client: reqwest::Client,
    identity_header: HeaderName,
}

impl AgentProxy {
    /// `identity_header` carries the user token to the agent.
    pub fn new(identity_header: HeaderName) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            identity_header,
        })
    }

    /// Send `method path` to the agent behind `endpoint`.
    ///
    /// `body` is sent as `application/json` when present. The upstream body
    /// must itself be JSON (empty is allowed for `HEAD`); anything else, or a
    /// transport failure, is reported as unreachable.
    pub async fn forward(
        &self,
        endpoint: &AgentEndpoint,
        name: &str,
        token: &UserToken,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<ProxiedResponse, OrchestratorError> {
        let unreachable = |reason: String| OrchestratorError::UpstreamUnreachable {
            name: name.to_string(),
            reason,
        };

        let is_head = method == Method::HEAD;
        let mut request = self
            .client
            .request(method.clone(), endpoint.url(path))
            .header(CONTENT_TYPE, "application/json")
            .header(self.identity_header.clone(), token.as_str());
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| unreachable(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| unreachable(format!("failed to read response: {}", e)))?;

        if !(is_head && body.is_empty()) {
            serde_json::from_slice::<serde::de::IgnoredAny>(&body)
                .map_err(|e| unreachable(format!("invalid JSON from agent: {}", e)))?;
        }

        tracing::debug!(
            container = %name,
            %method,
            path,
            status = status.as_u16(),
            bytes = body.len(),
            "Proxied request"
        );
        Ok(ProxiedResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::identity::{IdentityNormalizer, SanitizingNormalizer};
    use crate::testing::spawn_stub_agent;

    fn proxy() -> AgentProxy {
        AgentProxy::new(HeaderName::from_static("x-user-id")).unwrap()
    }

    async fn stub_endpoint() -> AgentEndpoint {
        let addr = spawn_stub_agent().await.unwrap();
        AgentEndpoint::new(addr.ip().to_string(), addr.port())
    }

    fn token() -> UserToken {
        SanitizingNormalizer.normalize("A@B.io")
    }

    #[tokio::test]
    async fn forwards_method_body_and_identity() {
        let endpoint = stub_endpoint().await;
        let resp = proxy()
            .forward(
                &endpoint,
                "agent-a_b_io",
                &token(),
                Method::POST,
                "/chat",
                Some(Bytes::from_static(br#"{"message":"hi"}"#)),
            )
            .await
            .unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        let echoed: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["path"], "/chat");
        assert_eq!(echoed["user"], "a_b_io");
        assert_eq!(echoed["content_type"], "application/json");
        assert_eq!(echoed["body"]["message"], "hi");
    }

    #[tokio::test]
    async fn get_is_sent_without_body() {
        let endpoint = stub_endpoint().await;
        let resp = proxy()
            .forward(&endpoint, "agent-x", &token(), Method::GET, "/files", None)
            .await
            .unwrap();

        let echoed: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(echoed["method"], "GET");
        assert!(echoed["body"].is_null());
    }

    #[tokio::test]
    async fn reply_bytes_are_relayed_untouched() {
        let endpoint = stub_endpoint().await;
        let raw = "{ \"z\" : 1,\n  \"a\":[ 2 ,3 ] }";
        let request = serde_json::json!({ "respond_raw": raw }).to_string();

        let resp = proxy()
            .forward(
                &endpoint,
                "agent-x",
                &token(),
                Method::POST,
                "/chat",
                Some(Bytes::from(request)),
            )
            .await
            .unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, Bytes::from(raw));
    }

    #[tokio::test]
    async fn upstream_error_status_is_relayed_verbatim() {
        let endpoint = stub_endpoint().await;
        let resp = proxy()
            .forward(
                &endpoint,
                "agent-x",
                &token(),
                Method::DELETE,
                "/memory",
                Some(Bytes::from_static(br#"{"respond_status":404}"#)),
            )
            .await
            .unwrap();

        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        let echoed: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(echoed["method"], "DELETE");
    }

    #[tokio::test]
    async fn non_json_reply_is_unreachable() {
        let endpoint = stub_endpoint().await;
        let err = proxy()
            .forward(
                &endpoint,
                "agent-x",
                &token(),
                Method::POST,
                "/chat",
                Some(Bytes::from_static(br#"{"respond_text":"<html>oops</html>"}"#)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::UpstreamUnreachable { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Bind and drop to find a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = AgentEndpoint::new("127.0.0.1", port);
        let err = proxy()
            .forward(&endpoint, "agent-x", &token(), Method::GET, "/chat", None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, OrchestratorError::UpstreamUnreachable { ref name, .. } if name == "agent-x")
        );
    }

    #[test]
    fn proxied_response_is_labelled_json() {
        let resp = ProxiedResponse {
            status: StatusCode::CREATED,
            body: Bytes::from_static(b"{}"),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()[CONTENT_TYPE], "application/json");
    }
}
