//! Orchestrator for per-user agent containers.
//!
//! For each request the orchestrator makes sure the caller's agent container
//! is running and healthy, then proxies the request to it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  Gateway                          │
//! │                                                   │
//! │  GatewayApi (default :8080)                       │
//! │    GET /health                                    │
//! │    ANY /chat /files /uploads /memory              │
//! │        /conversations  -> agent, same path         │
//! │                                                   │
//! │  AgentManager                                     │
//! │    ensure_agent() -> SpawnRegistry (one per user) │
//! │      find -> remove stale -> network -> provision │
//! │      -> create -> start -> health gate            │
//! │                                                   │
//! │  ShutdownCoordinator                              │
//! │    stop + remove every `agent-*` container        │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod agent_manager;
pub mod api;
pub mod docker;
pub mod health;
pub mod network;
pub mod proxy;
pub mod runtime;
pub mod shutdown;
pub mod spawn;
pub mod workspace;

pub use agent_manager::{AgentEndpoint, AgentManager};
pub use api::{GatewayApi, GatewayState};
pub use docker::DockerRuntime;
pub use health::{HealthPolicy, HealthProbe, HttpHealthProbe};
pub use proxy::{AgentProxy, ProxiedResponse};
pub use runtime::{ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use spawn::SpawnRegistry;
pub use workspace::WorkspaceProvisioner;
