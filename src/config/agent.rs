use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{
    first_env, optional_env, parse_list, parse_optional_env, parse_string_env,
};
use crate::error::ConfigError;

/// Restart policy applied to agent containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    /// Restart across crashes and daemon restarts, but not after an explicit stop.
    #[default]
    UnlessStopped,
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "no" | "none" => Ok(Self::No),
            "always" => Ok(Self::Always),
            "on-failure" | "on_failure" => Ok(Self::OnFailure),
            "unless-stopped" | "unless_stopped" => Ok(Self::UnlessStopped),
            _ => Err(format!(
                "invalid restart policy '{}', expected one of: no, always, on-failure, unless-stopped",
                s
            )),
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Always => write!(f, "always"),
            Self::OnFailure => write!(f, "on-failure"),
            Self::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

/// Settings for per-user agent containers and their workspaces.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Image every agent container runs.
    pub image: String,
    /// Command passed to the image.
    pub command: Vec<String>,
    /// Port the agent listens on inside its container.
    pub port: u16,
    /// Env var the agent reads its listen port from.
    pub port_env: String,
    /// Container names are `{name_prefix}{token}`. Shutdown cleanup removes
    /// every container carrying this prefix.
    pub name_prefix: String,
    /// Shared bridge network agents are attached to.
    pub network: String,
    /// Fixed host for reaching agents. `None` uses the container name, which
    /// resolves on the shared network.
    pub host_override: Option<String>,
    pub restart_policy: RestartPolicy,
    /// Per-user data root as seen by the container runtime (bind source).
    pub host_data_dir: PathBuf,
    /// The same data root as seen by this process (provisioning target).
    pub local_data_dir: PathBuf,
    /// Where the per-user data directory is mounted inside the agent.
    pub mount_target: String,
    /// Shared agent config copied into every user directory on spawn.
    pub config_path: PathBuf,
    /// Workspace template seeded into new user directories.
    pub template_dir: PathBuf,
    pub health_poll_interval: Duration,
    pub health_timeout: Duration,
    pub health_probe_timeout: Duration,
    /// Grace period given to each agent on shutdown before it is killed.
    pub stop_grace: Duration,
    /// Hard bound on the whole shutdown cleanup.
    pub shutdown_timeout: Duration,
    /// Docker socket path. `None` uses the runtime's local defaults.
    pub docker_socket: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            image: "nanobot-tutor".to_string(),
            command: vec!["gateway".to_string()],
            port: 8000,
            port_env: "NANOBOT_HTTP_PORT".to_string(),
            name_prefix: "agent-".to_string(),
            network: "nanobot-net".to_string(),
            host_override: None,
            restart_policy: RestartPolicy::UnlessStopped,
            host_data_dir: PathBuf::from("/data"),
            local_data_dir: PathBuf::from("/data"),
            mount_target: "/root/.nanobot".to_string(),
            config_path: PathBuf::from("/config/config.json"),
            template_dir: PathBuf::from("/template/workspace"),
            health_poll_interval: Duration::from_millis(500),
            health_timeout: Duration::from_secs(60),
            health_probe_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            docker_socket: None,
        }
    }
}

impl AgentConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            image: parse_string_env("AGENT_IMAGE", defaults.image)?,
            command: optional_env("AGENT_COMMAND")?
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.command),
            port: parse_optional_env("AGENT_PORT", defaults.port)?,
            port_env: parse_string_env("AGENT_PORT_ENV", defaults.port_env)?,
            name_prefix: parse_string_env("AGENT_NAME_PREFIX", defaults.name_prefix)?,
            network: parse_string_env("NETWORK_NAME", defaults.network)?,
            host_override: optional_env("AGENT_HOST")?,
            restart_policy: parse_optional_env("AGENT_RESTART_POLICY", defaults.restart_policy)?,
            host_data_dir: first_env(&["HOST_DATA_DIR", "DATA_DIR"])?
                .map(PathBuf::from)
                .unwrap_or(defaults.host_data_dir),
            local_data_dir: optional_env("LOCAL_DATA_DIR")?
                .map(PathBuf::from)
                .unwrap_or(defaults.local_data_dir),
            mount_target: parse_string_env("AGENT_MOUNT_TARGET", defaults.mount_target)?,
            // HOST_CONFIG_PATH names the file on the docker host and is not
            // readable from here; only CONFIG_PATH is a local copy source.
            config_path: optional_env("CONFIG_PATH")?
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            template_dir: optional_env("TEMPLATE_DIR")?
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            health_poll_interval: Duration::from_millis(parse_optional_env(
                "HEALTH_POLL_MS",
                500u64,
            )?),
            health_timeout: Duration::from_millis(parse_optional_env(
                "HEALTH_TIMEOUT_MS",
                60_000u64,
            )?),
            health_probe_timeout: Duration::from_millis(parse_optional_env(
                "HEALTH_PROBE_TIMEOUT_MS",
                2_000u64,
            )?),
            stop_grace: Duration::from_secs(parse_optional_env("STOP_GRACE_SECS", 5u64)?),
            shutdown_timeout: Duration::from_secs(parse_optional_env(
                "SHUTDOWN_TIMEOUT_SECS",
                10u64,
            )?),
            docker_socket: optional_env("DOCKER_SOCKET")?.map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_NAME_PREFIX".to_string(),
                message: "must not be empty, shutdown cleanup matches on it".to_string(),
            });
        }
        if self.command.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "AGENT_COMMAND".to_string(),
                hint: "Set at least one command word for the agent image.".to_string(),
            });
        }
        if self.health_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "HEALTH_POLL_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Container name for a user token.
    pub fn container_name(&self, token: &str) -> String {
        format!("{}{}", self.name_prefix, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::helpers::ENV_MUTEX;

    #[test]
    fn default_timings() {
        let config = AgentConfig::default();
        assert_eq!(config.health_poll_interval, Duration::from_millis(500));
        assert_eq!(config.health_timeout, Duration::from_secs(60));
        assert_eq!(config.health_probe_timeout, Duration::from_secs(2));
        assert_eq!(config.stop_grace, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn container_name_uses_prefix() {
        let config = AgentConfig::default();
        assert_eq!(config.container_name("a_b"), "agent-a_b");
    }

    #[test]
    fn restart_policy_round_trips_docker_spelling() {
        let policy: RestartPolicy = "unless-stopped".parse().unwrap();
        assert_eq!(policy, RestartPolicy::UnlessStopped);
        assert_eq!(policy.to_string(), "unless-stopped");
        assert_eq!("on_failure".parse::<RestartPolicy>(), Ok(RestartPolicy::OnFailure));
        assert!("sometimes".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn host_config_path_is_not_a_copy_source() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::remove_var("CONFIG_PATH");
            std::env::set_var("HOST_CONFIG_PATH", "/home/op/nanobot/config/config.json");
        }

        let config = AgentConfig::resolve().expect("resolve should succeed");
        assert_eq!(config.config_path, PathBuf::from("/config/config.json"));

        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("CONFIG_PATH", "/etc/agents/config.json");
        }
        let config = AgentConfig::resolve().expect("resolve should succeed");
        assert_eq!(config.config_path, PathBuf::from("/etc/agents/config.json"));

        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::remove_var("CONFIG_PATH");
            std::env::remove_var("HOST_CONFIG_PATH");
        }
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let config = AgentConfig {
            name_prefix: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
