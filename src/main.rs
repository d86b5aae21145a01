//! agent-gateway - Main entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderName;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use agent_gateway::{
    config::Config,
    orchestrator::{
        AgentManager, AgentProxy, DockerRuntime, GatewayApi, GatewayState, HttpHealthProbe,
        ShutdownCoordinator,
    },
};

#[derive(Parser, Debug)]
#[command(name = "agent-gateway")]
#[command(about = "Runs one agent container per user and proxies requests to it")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Env file to load instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Leave agent containers running on shutdown (also KEEP_AGENTS)
    #[arg(long)]
    keep_agents: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_gateway=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match args.env_file {
        Some(ref path) => Config::from_env_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    tracing::info!(
        image = %config.agent.image,
        network = %config.agent.network,
        data_dir = %config.agent.host_data_dir.display(),
        "Loaded configuration"
    );

    let runtime = Arc::new(DockerRuntime::new(config.agent.docker_socket.clone()));
    let probe = Arc::new(
        HttpHealthProbe::new(config.agent.health_probe_timeout)
            .context("failed to build health probe client")?,
    );
    let agents = Arc::new(AgentManager::new(config.agent.clone(), runtime, probe));

    let forwarded = config
        .gateway
        .forwarded_identity_header
        .parse::<HeaderName>()
        .context("invalid forwarded identity header")?;
    let proxy = Arc::new(AgentProxy::new(forwarded).context("failed to build proxy client")?);

    let state = GatewayState::new(
        Arc::clone(&agents),
        proxy,
        config.gateway.identity_header.clone(),
    );
    let server = GatewayApi::start(
        state,
        config.gateway.listen_addr(),
        config.gateway.body_limit_bytes(),
    );

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Gateway server failed: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
    }

    if args.keep_agents || config.gateway.keep_agents {
        tracing::info!("Leaving agent containers running");
        return Ok(());
    }

    let report = ShutdownCoordinator::new(agents).run().await;
    if report.timed_out {
        std::process::exit(report.exit_code());
    }

    tracing::info!("Gateway shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
