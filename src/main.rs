//! MCP Gateway - HTTP access to a stdio data-access server.
//!
//! Reads configuration from the environment, starts the supervised child
//! session and serves the HTTP API until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcp_gateway::config::GatewayConfig;
use mcp_gateway::server;
use mcp_gateway::session::{CommandLauncher, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mcp_gateway=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("Starting MCP Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig::from_env().context("Invalid gateway configuration")?;
    info!(
        database = %config.redacted_database_url(),
        command = %config.server_program,
        "Configuration loaded"
    );

    let (supervisor, session) = Supervisor::new(
        CommandLauncher::from_config(&config),
        config.supervisor_config(),
    );
    let supervisor_task = supervisor.spawn();

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let result = server::serve(listener, session, shutdown_signal()).await;

    // Dropping the supervisor drops the child, which is killed on drop.
    supervisor_task.abort();
    let _ = supervisor_task.await;

    result.context("HTTP server failed")?;
    info!("Gateway stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
