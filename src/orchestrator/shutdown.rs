//! Tear-down of every managed agent when the gateway exits.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::error::OrchestratorError;
use crate::orchestrator::agent_manager::AgentManager;

/// Outcome of a shutdown cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Containers stopped and removed.
    pub removed: Vec<String>,
    /// Containers whose removal failed.
    pub failed: Vec<String>,
    /// The hard timeout fired before cleanup finished.
    pub timed_out: bool,
}

impl ShutdownReport {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.timed_out { 1 } else { 0 }
    }
}

pub struct ShutdownCoordinator {
    agents: Arc<AgentManager>,
    hard_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(agents: Arc<AgentManager>) -> Self {
        let hard_timeout = agents.config().shutdown_timeout;
        Self {
            agents,
            hard_timeout,
        }
    }

    /// Stop and remove every managed container, bounded by the hard timeout.
    pub async fn run(&self) -> ShutdownReport {
        tracing::info!(timeout_secs = self.hard_timeout.as_secs(), "Stopping agent containers");
        match tokio::time::timeout(self.hard_timeout, self.stop_all()).await {
            Ok(Ok(report)) => {
                tracing::info!(
                    removed = report.removed.len(),
                    failed = report.failed.len(),
                    "Agent cleanup finished"
                );
                report
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Could not list agent containers");
                ShutdownReport::default()
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.hard_timeout.as_secs(),
                    "Agent cleanup timed out"
                );
                ShutdownReport {
                    timed_out: true,
                    ..Default::default()
                }
            }
        }
    }

    async fn stop_all(&self) -> Result<ShutdownReport, OrchestratorError> {
        let containers = self.agents.managed_containers().await?;

        let outcomes = join_all(containers.iter().map(|c| async move {
            let name = c.display_name().to_string();
            let result = self.agents.stop_and_remove(c).await;
            (name, result)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (name, result) in outcomes {
            match result {
                Ok(()) => report.removed.push(name),
                Err(e) => {
                    tracing::warn!(container = %name, error = %e, "Failed to remove agent container");
                    report.failed.push(name);
                }
            }
        }
        Ok(report)
    }
}
