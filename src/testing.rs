//! In-memory test doubles for the container runtime and the health probe.
//!
//! Compiled for unit tests and behind the `test-support` feature, so
//! integration tests under `tests/` can drive the gateway without a Docker
//! daemon.

use std::future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::error::RuntimeError;
use crate::orchestrator::agent_manager::AgentEndpoint;
use crate::orchestrator::health::HealthProbe;
use crate::orchestrator::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary,
};

/// A call made against [`FakeRuntime`]. Container calls carry the id,
/// except creation which carries the requested name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    ListContainers,
    CreateContainer(String),
    StartContainer(String),
    StopContainer(String),
    RemoveContainer(String),
    ListNetworks,
    CreateNetwork(String),
}

#[derive(Debug)]
struct FakeContainer {
    id: String,
    name: String,
    state: ContainerState,
    spec: Option<ContainerSpec>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    networks: Vec<String>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
    fail_create: Option<String>,
    fail_remove: bool,
    fail_stop: bool,
    fail_list_networks: bool,
    network_conflict: bool,
    create_delay: Option<Duration>,
    stop_delay: Option<Duration>,
}

impl FakeState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("fake-{:04}", self.next_id)
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut FakeContainer, RuntimeError> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::NotFound {
                name: id.to_string(),
            })
    }
}

/// Records every call and keeps containers and networks in memory.
///
/// Failures and delays are switched on per operation with the `set_*`
/// methods.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a container as if it had been left over from an earlier run.
    /// Returns its id.
    pub fn add_container(&self, name: &str, state: ContainerState) -> String {
        let mut inner = self.state();
        let id = inner.allocate_id();
        inner.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            state,
            spec: None,
        });
        id
    }

    pub fn container_state(&self, name: &str) -> Option<ContainerState> {
        self.state()
            .containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.state)
    }

    /// Spec the container was created with; `None` for seeded containers.
    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state()
            .containers
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.spec.clone())
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn add_network(&self, name: &str) {
        self.state().networks.push(name.to_string());
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.state().networks.iter().any(|n| n == name)
    }

    /// Make network creation report that the network already exists.
    pub fn set_network_conflict(&self, conflict: bool) {
        self.state().network_conflict = conflict;
    }

    pub fn set_fail_list_networks(&self, fail: bool) {
        self.state().fail_list_networks = fail;
    }

    /// Fail every creation with this reason; `None` restores success.
    pub fn set_fail_create(&self, reason: Option<String>) {
        self.state().fail_create = reason;
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.state().fail_remove = fail;
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.state().fail_stop = fail;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = Some(delay);
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        self.state().stop_delay = Some(delay);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut inner = self.state();
        inner.calls.push(RuntimeCall::ListContainers);
        Ok(inner
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                state: c.state,
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let delay = {
            let mut inner = self.state();
            inner
                .calls
                .push(RuntimeCall::CreateContainer(spec.name.clone()));
            inner.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.state();
        if let Some(reason) = inner.fail_create.clone() {
            return Err(RuntimeError::Api { reason });
        }
        if inner.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Conflict {
                reason: format!("container name {} is already in use", spec.name),
            });
        }
        let id = inner.allocate_id();
        inner.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            state: ContainerState::Created,
            spec: Some(spec.clone()),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.state();
        inner.calls.push(RuntimeCall::StartContainer(id.to_string()));
        inner.find_mut(id)?.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        let delay = {
            let mut inner = self.state();
            inner.calls.push(RuntimeCall::StopContainer(id.to_string()));
            inner.stop_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.state();
        if inner.fail_stop {
            return Err(RuntimeError::Api {
                reason: "stop refused".to_string(),
            });
        }
        inner.find_mut(id)?.state = ContainerState::Stopped;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.state();
        inner.calls.push(RuntimeCall::RemoveContainer(id.to_string()));
        if inner.fail_remove {
            return Err(RuntimeError::Api {
                reason: "removal refused".to_string(),
            });
        }
        let before = inner.containers.len();
        inner.containers.retain(|c| c.id != id);
        if inner.containers.len() == before {
            return Err(RuntimeError::NotFound {
                name: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<String>, RuntimeError> {
        let mut inner = self.state();
        inner.calls.push(RuntimeCall::ListNetworks);
        if inner.fail_list_networks {
            return Err(RuntimeError::Connect {
                reason: "daemon unavailable".to_string(),
            });
        }
        Ok(inner.networks.clone())
    }

    async fn create_network(&self, name: &str, _driver: &str) -> Result<(), RuntimeError> {
        let mut inner = self.state();
        inner.calls.push(RuntimeCall::CreateNetwork(name.to_string()));
        if !inner.networks.iter().any(|n| n == name) {
            inner.networks.push(name.to_string());
        }
        if inner.network_conflict {
            return Err(RuntimeError::Conflict {
                reason: format!("network with name {} already exists", name),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ProbeScript {
    /// Fail this many checks, then succeed.
    HealthyAfter(usize),
    NeverHealthy,
    /// Never complete a check.
    Hanging,
}

/// Health probe with a fixed script of answers.
#[derive(Debug)]
pub struct ScriptedProbe {
    script: ProbeScript,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    fn with_script(script: ProbeScript) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn healthy_after(failures: usize) -> Self {
        Self::with_script(ProbeScript::HealthyAfter(failures))
    }

    pub fn always_healthy() -> Self {
        Self::healthy_after(0)
    }

    pub fn never_healthy() -> Self {
        Self::with_script(ProbeScript::NeverHealthy)
    }

    pub fn hanging() -> Self {
        Self::with_script(ProbeScript::Hanging)
    }

    /// Checks started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, _endpoint: &AgentEndpoint) -> Result<(), String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            ProbeScript::HealthyAfter(failures) if n >= failures => Ok(()),
            ProbeScript::HealthyAfter(_) | ProbeScript::NeverHealthy => {
                Err("connection refused".to_string())
            }
            ProbeScript::Hanging => future::pending().await,
        }
    }
}

/// Start a minimal agent on an ephemeral loopback port.
///
/// `/health` answers 200. Every other path echoes the request as JSON:
/// `{method, path, user, content_type, body}`, where `user` is the
/// `X-User-ID` header and `body` the parsed JSON body (or null). A JSON body
/// with `respond_status` sets the reply status; one with `respond_text`
/// makes the agent answer with that plain text instead, and `respond_raw`
/// is sent back byte for byte as the JSON reply.
pub async fn spawn_stub_agent() -> std::io::Result<SocketAddr> {
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .fallback(echo);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let parsed: Option<Value> = serde_json::from_slice(&body).ok();

    if let Some(raw) = parsed
        .as_ref()
        .and_then(|v| v.get("respond_raw"))
        .and_then(Value::as_str)
    {
        return (
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            raw.to_string(),
        )
            .into_response();
    }
    if let Some(text) = parsed
        .as_ref()
        .and_then(|v| v.get("respond_text"))
        .and_then(Value::as_str)
    {
        return text.to_string().into_response();
    }
    let status = parsed
        .as_ref()
        .and_then(|v| v.get("respond_status"))
        .and_then(Value::as_u64)
        .and_then(|s| StatusCode::from_u16(s as u16).ok())
        .unwrap_or(StatusCode::OK);

    let reply = json!({
        "method": method.as_str(),
        "path": uri.path(),
        "user": header("x-user-id"),
        "content_type": header("content-type"),
        "body": parsed,
    });
    (status, Json(reply)).into_response()
}
