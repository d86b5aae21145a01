//! Container lifecycle for per-user agents.
//!
//! Every mutation of the runtime's container namespace goes through
//! [`AgentManager`]: finding a user's container, recreating it when it is
//! not running, and stopping/removing managed containers on shutdown.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::OrchestratorError;
use crate::identity::UserToken;
use crate::orchestrator::health::{HealthPolicy, HealthProbe, wait_for_health};
use crate::orchestrator::network::ensure_network;
use crate::orchestrator::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary,
};
use crate::orchestrator::spawn::SpawnRegistry;
use crate::orchestrator::workspace::WorkspaceProvisioner;

/// Where a ready agent can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentEndpoint {
    pub host: String,
    pub port: u16,
}

impl AgentEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `base_url()` joined with an absolute request path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

impl std::fmt::Display for AgentEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Finds, (re)creates, starts and health-checks agent containers.
pub struct AgentManager {
    config: AgentConfig,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
    provisioner: WorkspaceProvisioner,
    spawns: SpawnRegistry,
}

impl AgentManager {
    pub fn new(
        config: AgentConfig,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let provisioner = WorkspaceProvisioner::new(
            config.local_data_dir.clone(),
            config.config_path.clone(),
            config.template_dir.clone(),
        );
        Self {
            config,
            runtime,
            probe,
            provisioner,
            spawns: SpawnRegistry::new(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn spawns(&self) -> &SpawnRegistry {
        &self.spawns
    }

    pub fn container_name(&self, token: &UserToken) -> String {
        self.config.container_name(token.as_str())
    }

    pub fn endpoint_for(&self, container_name: &str) -> AgentEndpoint {
        let host = self
            .config
            .host_override
            .clone()
            .unwrap_or_else(|| container_name.to_string());
        AgentEndpoint::new(host, self.config.port)
    }

    /// Ensure `token` has a running, healthy agent, with at most one spawn
    /// in flight per user no matter how many requests arrive at once.
    pub async fn ensure_agent(
        self: &Arc<Self>,
        token: &UserToken,
    ) -> Result<AgentEndpoint, OrchestratorError> {
        let name = self.container_name(token);
        let this = Arc::clone(self);
        let token = token.clone();
        self.spawns
            .run_once(&name, move || async move { this.ensure_container(&token).await })
            .await
    }

    /// Look up the user's container; reuse it if running, otherwise
    /// (re)create it and wait for it to pass the health gate.
    ///
    /// Callers other than [`ensure_agent`](Self::ensure_agent) bypass spawn
    /// deduplication.
    pub async fn ensure_container(
        &self,
        token: &UserToken,
    ) -> Result<AgentEndpoint, OrchestratorError> {
        let name = self.container_name(token);
        let endpoint = self.endpoint_for(&name);

        if let Some(existing) = self.find_container(&name).await? {
            if existing.state == ContainerState::Running {
                return Ok(endpoint);
            }
            // Never reuse a stopped container: recreate it with current config.
            match self.runtime.remove_container(&existing.id).await {
                Ok(()) => {
                    tracing::info!(container = %name, state = %existing.state, "Removed stale container");
                }
                Err(e) => {
                    tracing::error!(container = %name, error = %e, "Failed to remove stale container");
                }
            }
        }

        if let Err(e) = ensure_network(self.runtime.as_ref(), &self.config.network).await {
            tracing::warn!(network = %self.config.network, error = %e, "Could not ensure agent network");
        }

        self.provision(token).await?;

        let spec = self.container_spec(token, &name);
        tracing::info!(container = %name, binds = ?spec.binds, "Creating agent container");
        let id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| OrchestratorError::runtime("create_container", e))?;

        self.runtime
            .start_container(&id)
            .await
            .map_err(|e| OrchestratorError::runtime("start_container", e))?;
        tracing::info!(container = %name, token = %token, "Spawned agent container");

        // On timeout the container stays in place for inspection.
        wait_for_health(
            self.probe.as_ref(),
            &name,
            &endpoint,
            HealthPolicy::from_config(&self.config),
        )
        .await?;

        Ok(endpoint)
    }

    /// Container with exactly this name, if any.
    pub async fn find_container(
        &self,
        name: &str,
    ) -> Result<Option<ContainerSummary>, OrchestratorError> {
        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(|e| OrchestratorError::runtime("list_containers", e))?;
        Ok(containers.into_iter().find(|c| c.has_name(name)))
    }

    /// All containers following the agent naming convention.
    pub async fn managed_containers(&self) -> Result<Vec<ContainerSummary>, OrchestratorError> {
        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(|e| OrchestratorError::runtime("list_containers", e))?;
        Ok(containers
            .into_iter()
            .filter(|c| c.has_name_prefix(&self.config.name_prefix))
            .collect())
    }

    /// Stop with the configured grace period, then force-remove regardless
    /// of how the stop went.
    pub async fn stop_and_remove(
        &self,
        container: &ContainerSummary,
    ) -> Result<(), OrchestratorError> {
        let name = container.display_name();
        if let Err(e) = self
            .runtime
            .stop_container(&container.id, self.config.stop_grace)
            .await
        {
            tracing::debug!(container = %name, error = %e, "Stop failed (may already be stopped)");
        }
        self.runtime
            .remove_container(&container.id)
            .await
            .map_err(|e| OrchestratorError::runtime("remove_container", e))?;
        tracing::info!(container = %name, "Removed agent container");
        Ok(())
    }

    async fn provision(&self, token: &UserToken) -> Result<(), OrchestratorError> {
        let provisioner = self.provisioner.clone();
        let owned = token.clone();
        tokio::task::spawn_blocking(move || provisioner.provision(&owned))
            .await
            .map_err(|e| OrchestratorError::Provision {
                token: token.to_string(),
                reason: format!("provisioning task failed: {}", e),
            })??;
        Ok(())
    }

    fn container_spec(&self, token: &UserToken, name: &str) -> ContainerSpec {
        let host_dir = self.config.host_data_dir.join(token.as_str());
        ContainerSpec {
            name: name.to_string(),
            image: self.config.image.clone(),
            cmd: self.config.command.clone(),
            env: vec![
                format!("{}={}", self.config.port_env, self.config.port),
                "NO_COLOR=1".to_string(),
            ],
            binds: vec![format!(
                "{}:{}",
                host_dir.display(),
                self.config.mount_target
            )],
            network: self.config.network.clone(),
            exposed_port: self.config.port,
            restart_policy: self.config.restart_policy,
        }
    }
}
