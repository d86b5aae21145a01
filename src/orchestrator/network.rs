//! Shared bridge network every agent container is attached to.

use crate::error::{OrchestratorError, RuntimeError};
use crate::orchestrator::runtime::ContainerRuntime;

const NETWORK_DRIVER: &str = "bridge";

/// Create the network `name` unless it already exists.
///
/// Losing a creation race to another process is success.
pub async fn ensure_network(
    runtime: &dyn ContainerRuntime,
    name: &str,
) -> Result<(), OrchestratorError> {
    let networks = runtime
        .list_networks()
        .await
        .map_err(|e| OrchestratorError::runtime("list_networks", e))?;
    if networks.iter().any(|n| n == name) {
        return Ok(());
    }

    match runtime.create_network(name, NETWORK_DRIVER).await {
        Ok(()) => {
            tracing::info!(network = %name, "Created agent network");
            Ok(())
        }
        Err(RuntimeError::Conflict { .. }) => {
            tracing::debug!(network = %name, "Network created concurrently");
            Ok(())
        }
        Err(e) => Err(OrchestratorError::runtime("create_network", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRuntime, RuntimeCall};

    #[tokio::test]
    async fn creates_missing_network_once() {
        let runtime = FakeRuntime::new();
        ensure_network(&runtime, "nanobot-net").await.unwrap();
        ensure_network(&runtime, "nanobot-net").await.unwrap();

        assert_eq!(runtime.count(|c| matches!(c, RuntimeCall::CreateNetwork(_))), 1);
        assert!(runtime.has_network("nanobot-net"));
    }

    #[tokio::test]
    async fn existing_network_is_left_alone() {
        let runtime = FakeRuntime::new();
        runtime.add_network("nanobot-net");

        ensure_network(&runtime, "nanobot-net").await.unwrap();
        assert_eq!(runtime.count(|c| matches!(c, RuntimeCall::CreateNetwork(_))), 0);
    }

    #[tokio::test]
    async fn already_exists_race_is_success() {
        let runtime = FakeRuntime::new();
        runtime.set_network_conflict(true);

        ensure_network(&runtime, "nanobot-net").await.unwrap();
        assert_eq!(runtime.count(|c| matches!(c, RuntimeCall::CreateNetwork(_))), 1);
    }
}
