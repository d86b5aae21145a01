//! Configuration for the gateway.
//!
//! Everything comes from env vars (optionally seeded from a `.env` file via
//! dotenvy) with defaults matching the container layout the agents expect.

mod agent;
mod gateway;
pub(crate) mod helpers;

use std::path::Path;

use crate::error::ConfigError;

pub use self::agent::{AgentConfig, RestartPolicy};
pub use self::gateway::GatewayConfig;

/// Main configuration for the gateway.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub agent: AgentConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `./.env` is read first if present; dotenvy never overwrites vars that
    /// are already set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::build()
    }

    /// Load an explicit env file (errors are fatal), then resolve from env.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::from_path(path).map_err(|e| {
            ConfigError::ParseError(format!("Failed to load env file {}: {}", path.display(), e))
        })?;
        Self::build()
    }

    fn build() -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve()?,
            agent: AgentConfig::resolve()?,
        })
    }
}
