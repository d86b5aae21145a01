use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::config::helpers::{parse_bool_env, parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// Inbound HTTP server settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the gateway binds to.
    pub host: IpAddr,
    /// Port the gateway listens on.
    pub port: u16,
    /// Trusted header carrying the raw user identity (set by the front end).
    pub identity_header: String,
    /// Header carrying the normalized token to the agent.
    pub forwarded_identity_header: String,
    /// Maximum accepted request body, in megabytes.
    pub body_limit_mb: usize,
    /// Skip agent cleanup on shutdown.
    pub keep_agents: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            identity_header: "X-User-Email".to_string(),
            forwarded_identity_header: "X-User-ID".to_string(),
            body_limit_mb: 30,
            keep_agents: false,
        }
    }
}

impl GatewayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: parse_optional_env("GATEWAY_HOST", defaults.host)?,
            port: parse_optional_env("PORT", defaults.port)?,
            identity_header: parse_string_env("IDENTITY_HEADER", defaults.identity_header)?,
            forwarded_identity_header: parse_string_env(
                "FORWARDED_IDENTITY_HEADER",
                defaults.forwarded_identity_header,
            )?,
            body_limit_mb: parse_optional_env("BODY_LIMIT_MB", defaults.body_limit_mb)?,
            keep_agents: parse_bool_env("KEEP_AGENTS", defaults.keep_agents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject header names axum would refuse at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("IDENTITY_HEADER", &self.identity_header),
            ("FORWARDED_IDENTITY_HEADER", &self.forwarded_identity_header),
        ] {
            if axum::http::HeaderName::from_bytes(value.as_bytes()).is_err() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{}' is not a valid HTTP header name", value),
                });
            }
        }
        if self.body_limit_mb == 0 {
            return Err(ConfigError::InvalidValue {
                key: "BODY_LIMIT_MB".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb * 1024 * 1024
    }
}
