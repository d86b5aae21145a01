//! Health gate for freshly started agents.
//!
//! A new container's endpoint is handed out only after its `/health` route
//! answers with a success status. Probing is a bounded retry loop: each
//! probe has its own short timeout nested inside the overall deadline, so a
//! hung probe cannot push the failure past that deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::AgentConfig;
use crate::error::OrchestratorError;
use crate::orchestrator::agent_manager::AgentEndpoint;

/// One liveness check against an agent.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(())` if the agent is ready, otherwise a short reason.
    async fn check(&self, endpoint: &AgentEndpoint) -> Result<(), String>;
}

/// `GET {endpoint}/health`, healthy on any 2xx.
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(probe_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(probe_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, endpoint: &AgentEndpoint) -> Result<(), String> {
        let url = format!("{}/health", endpoint.base_url());
        let resp = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("status {}", resp.status()))
        }
    }
}

/// Timing of the health gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl HealthPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            poll_interval: config.health_poll_interval,
            timeout: config.health_timeout,
            probe_timeout: config.health_probe_timeout,
        }
    }
}

/// Poll `probe` until it succeeds or `policy.timeout` elapses.
pub async fn wait_for_health(
    probe: &dyn HealthProbe,
    name: &str,
    endpoint: &AgentEndpoint,
    policy: HealthPolicy,
) -> Result<(), OrchestratorError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut attempts: u32 = 0;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        attempts += 1;

        let budget = policy.probe_timeout.min(deadline - now);
        match tokio::time::timeout(budget, probe.check(endpoint)).await {
            Ok(Ok(())) => {
                tracing::info!(
                    container = %name,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Agent is healthy"
                );
                return Ok(());
            }
            Ok(Err(reason)) => {
                tracing::debug!(container = %name, attempt = attempts, %reason, "Agent not ready yet");
            }
            Err(_) => {
                tracing::debug!(container = %name, attempt = attempts, "Health probe timed out");
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(policy.poll_interval.min(remaining)).await;
    }

    Err(OrchestratorError::HealthTimeout {
        name: name.to_string(),
        timeout_ms: policy.timeout.as_millis() as u64,
    })
}
