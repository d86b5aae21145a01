//! Gateway that gives every user their own agent container.
//!
//! Requests carry a user identity header; the gateway maps it to a
//! [`identity::UserToken`], makes sure that user's container is running and
//! healthy, and proxies the request to it. See [`orchestrator`] for the
//! moving parts.

pub mod config;
pub mod error;
pub mod identity;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::Config;
pub use error::{ConfigError, OrchestratorError, RuntimeError};
