//! [`ContainerRuntime`] backed by the Docker Engine API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::models::{HostConfig, RestartPolicyNameEnum};
use bollard::network::CreateNetworkOptions;
use tokio::sync::RwLock;

use crate::config::RestartPolicy;
use crate::error::RuntimeError;
use crate::orchestrator::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary,
};

/// Seconds bollard waits on a single API call over a unix socket.
const DOCKER_API_TIMEOUT_SECS: u64 = 120;

/// Connect to Docker and check it answers.
pub async fn connect_docker(socket: Option<&Path>) -> Result<Docker, RuntimeError> {
    let docker = match socket {
        Some(path) => Docker::connect_with_unix(
            &path.to_string_lossy(),
            DOCKER_API_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        ),
        None => Docker::connect_with_local_defaults(),
    }
    .map_err(|e| RuntimeError::Connect {
        reason: e.to_string(),
    })?;

    docker.ping().await.map_err(|e| RuntimeError::Connect {
        reason: format!("ping failed: {}", e),
    })?;

    Ok(docker)
}

fn map_docker_error(name: &str, err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound {
            name: name.to_string(),
        },
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict { reason: message },
        other => RuntimeError::Api {
            reason: other.to_string(),
        },
    }
}

fn restart_policy_name(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    }
}

fn to_summary(c: bollard::models::ContainerSummary) -> Option<ContainerSummary> {
    let id = c.id?;
    let names = c
        .names
        .unwrap_or_default()
        .into_iter()
        .map(|n| n.trim_start_matches('/').to_string())
        .collect();
    let state = ContainerState::from_runtime(c.state.as_deref().unwrap_or_default());
    Some(ContainerSummary { id, names, state })
}

/// Docker-backed runtime. The connection is opened on first use and cached.
pub struct DockerRuntime {
    socket: Option<PathBuf>,
    docker: Arc<RwLock<Option<Docker>>>,
}

impl DockerRuntime {
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self {
            socket,
            docker: Arc::new(RwLock::new(None)),
        }
    }

    /// Get or create a Docker connection.
    async fn docker(&self) -> Result<Docker, RuntimeError> {
        {
            let guard = self.docker.read().await;
            if let Some(ref d) = *guard {
                return Ok(d.clone());
            }
        }
        let docker = connect_docker(self.socket.as_deref()).await?;
        *self.docker.write().await = Some(docker.clone());
        Ok(docker)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let docker = self.docker().await?;
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_docker_error("containers", e))?;
        Ok(containers.into_iter().filter_map(to_summary).collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let docker = self.docker().await?;

        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            network_mode: Some(spec.network.clone()),
            restart_policy: Some(bollard::models::RestartPolicy {
                name: Some(restart_policy_name(spec.restart_policy)),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            [(format!("{}/tcp", spec.exposed_port), HashMap::new())]
                .into_iter()
                .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_docker_error(&spec.name, e))?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "Docker warning on create: {}", warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let docker = self.docker().await?;
        docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| map_docker_error(id, e))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let docker = self.docker().await?;
        docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await
            .map_err(|e| map_docker_error(id, e))
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let docker = self.docker().await?;
        docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_docker_error(id, e))
    }

    async fn list_networks(&self) -> Result<Vec<String>, RuntimeError> {
        let docker = self.docker().await?;
        let networks = docker
            .list_networks::<String>(None)
            .await
            .map_err(|e| map_docker_error("networks", e))?;
        Ok(networks.into_iter().filter_map(|n| n.name).collect())
    }

    async fn create_network(&self, name: &str, driver: &str) -> Result<(), RuntimeError> {
        let docker = self.docker().await?;
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: driver.to_string(),
            ..Default::default()
        };
        docker
            .create_network(options)
            .await
            .map_err(|e| map_docker_error(name, e))?;
        Ok(())
    }
}
