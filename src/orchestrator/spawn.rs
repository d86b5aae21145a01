//! At most one in-flight spawn per container.
//!
//! The first caller for a key starts the spawn on its own task and parks a
//! shared handle in the registry; every caller that arrives while it runs
//! awaits that same handle and sees the same result, success or failure.
//! The entry is removed when the task ends, however it ends, so a later
//! request can retry after a failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::OrchestratorError;
use crate::orchestrator::agent_manager::AgentEndpoint;

type SpawnResult = Result<AgentEndpoint, OrchestratorError>;
type PendingSpawn = Shared<BoxFuture<'static, SpawnResult>>;
type Inflight = Arc<Mutex<HashMap<String, PendingSpawn>>>;

/// Registry of spawns in progress, keyed by container name.
///
/// Owned by one orchestrator; independent orchestrators (e.g. in tests)
/// never share entries.
#[derive(Default)]
pub struct SpawnRegistry {
    inflight: Inflight,
}

/// Removes the registry entry when the spawn task finishes, panics or is
/// aborted.
struct InflightGuard {
    inflight: Inflight,
    key: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        lock(&self.inflight).remove(&self.key);
    }
}

fn lock(inflight: &Inflight) -> MutexGuard<'_, HashMap<String, PendingSpawn>> {
    // The map is only touched in short non-panicking sections; a poisoned
    // lock still holds a consistent map.
    inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SpawnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` unless a spawn for `key` is already in flight, in which
    /// case wait for that one instead.
    ///
    /// `make` is only called by the caller that starts the spawn.
    pub async fn run_once<F, Fut>(&self, key: &str, make: F) -> SpawnResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SpawnResult> + Send + 'static,
    {
        let pending = {
            let mut inflight = lock(&self.inflight);
            if let Some(existing) = inflight.get(key) {
                tracing::debug!(container = %key, "Joining in-flight spawn");
                existing.clone()
            } else {
                let work = make();
                let guard = InflightGuard {
                    inflight: Arc::clone(&self.inflight),
                    key: key.to_string(),
                };
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    work.await
                });

                let name = key.to_string();
                let pending = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(OrchestratorError::SpawnAborted {
                            name,
                            reason: e.to_string(),
                        }),
                    }
                }
                .boxed()
                .shared();

                inflight.insert(key.to_string(), pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Number of spawns currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    pub fn is_spawning(&self, key: &str) -> bool {
        lock(&self.inflight).contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn endpoint(host: &str) -> AgentEndpoint {
        AgentEndpoint::new(host, 8000)
    }

    async fn never_started() -> SpawnResult {
        unreachable!("spawn already in flight")
    }

    async fn explode() -> SpawnResult {
        panic!("runtime exploded")
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_spawn() {
        let registry = Arc::new(SpawnRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                registry
                    .run_once("agent-new_user", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(endpoint("agent-new_user"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, endpoint("agent-new_user"));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn waiters_see_the_same_failure_and_later_calls_retry() {
        let registry = Arc::new(SpawnRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let fail = |runs: Arc<AtomicUsize>| {
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(OrchestratorError::HealthTimeout {
                    name: "agent-x".to_string(),
                    timeout_ms: 60_000,
                })
            }
        };

        let (a, b) = tokio::join!(
            registry.run_once("agent-x", fail(Arc::clone(&runs))),
            registry.run_once("agent-x", fail(Arc::clone(&runs))),
        );
        assert!(matches!(a, Err(OrchestratorError::HealthTimeout { .. })));
        assert!(matches!(b, Err(OrchestratorError::HealthTimeout { .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!registry.is_spawning("agent-x"));

        // Entry is gone, so the next request starts a fresh attempt.
        let retry = registry
            .run_once("agent-x", || async { Ok(endpoint("agent-x")) })
            .await;
        assert!(retry.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_wait_on_each_other() {
        let registry = Arc::new(SpawnRegistry::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .run_once("agent-slow", || async move {
                        let _ = release_rx.await;
                        Ok(endpoint("agent-slow"))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.is_spawning("agent-slow"));

        let fast = registry
            .run_once("agent-fast", || async { Ok(endpoint("agent-fast")) })
            .await
            .unwrap();
        assert_eq!(fast, endpoint("agent-fast"));

        release_tx.send(()).unwrap();
        assert!(slow.await.unwrap().is_ok());
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_abort_spawn() {
        let registry = Arc::new(SpawnRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let first = {
            let registry = Arc::clone(&registry);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                registry
                    .run_once("agent-x", || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(endpoint("agent-x"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        let joined = registry
            .run_once("agent-x", never_started)
            .await
            .unwrap();
        assert_eq!(joined, endpoint("agent-x"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_spawn_is_reported_and_cleared() {
        let registry = SpawnRegistry::new();
        let result = registry
            .run_once("agent-x", explode)
            .await;

        assert!(matches!(result, Err(OrchestratorError::SpawnAborted { .. })));
        assert_eq!(registry.in_flight(), 0);
    }
}
