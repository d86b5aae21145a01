//! Capability interface to the container runtime.
//!
//! Only the primitives the orchestrator needs: list/create/start/stop/remove
//! containers and list/create networks. [`DockerRuntime`](super::docker::DockerRuntime)
//! implements it against the Docker API; tests use the in-memory
//! `testing::FakeRuntime`.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::RestartPolicy;
use crate::error::RuntimeError;

/// Lifecycle state of a container as the orchestrator sees it.
///
/// "Absent" is not a variant; lookups return `None` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    /// Anything else the runtime reports: exited, dead, paused, restarting.
    Stopped,
}

impl ContainerState {
    /// Map a Docker-style state string.
    pub fn from_runtime(state: &str) -> Self {
        match state {
            "running" => Self::Running,
            "created" => Self::Created,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Names without the leading `/` Docker adds.
    pub names: Vec<String>,
    pub state: ContainerState,
}

impl ContainerSummary {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn has_name_prefix(&self, prefix: &str) -> bool {
        self.names.iter().any(|n| n.starts_with(prefix))
    }

    /// Name used in logs.
    pub fn display_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.id)
    }
}

/// Everything needed to create an agent container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=value` entries.
    pub env: Vec<String>,
    /// `host_path:container_path` entries.
    pub binds: Vec<String>,
    pub network: String,
    /// TCP port exposed by the container.
    pub exposed_port: u16,
    pub restart_policy: RestartPolicy,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers, including stopped ones.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Create a container and return its id. Does not start it.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Ask the container to stop, killing it after `grace`.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Force-remove a container, running or not.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Names of all networks.
    async fn list_networks(&self) -> Result<Vec<String>, RuntimeError>;

    /// Create a network. Returns [`RuntimeError::Conflict`] if it already exists.
    async fn create_network(&self, name: &str, driver: &str) -> Result<(), RuntimeError>;
}
