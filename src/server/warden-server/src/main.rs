//! Warden Server - Main entry point.

mod app;
mod config;

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    app::Gateway,
    config::{SecretOverrides, WardenConfig},
};

#[derive(Parser)]
#[command(name = "warden-server")]
#[command(about = "Warden - hybrid LDAP, SAML and token authentication gateway")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/warden.toml")]
    config: PathBuf,

    /// Server bind address (overrides server.bind)
    #[arg(long, env = "WARDEN_BIND_ADDRESS")]
    bind: Option<String>,

    /// Directory service account password
    #[arg(long, env = "WARDEN_DIRECTORY_BIND_PASSWORD", hide_env_values = true)]
    directory_bind_password: Option<String>,

    /// Bearer token signing secret
    #[arg(long, env = "WARDEN_TOKEN_SECRET", hide_env_values = true)]
    token_secret: Option<String>,

    /// Session cookie secret
    #[arg(long, env = "WARDEN_SESSION_SECRET", hide_env_values = true)]
    session_secret: Option<String>,

    /// Database URL
    #[arg(long, env = "WARDEN_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting Warden server...");
    let mut config = WardenConfig::load(
        &cli.config,
        SecretOverrides {
            directory_bind_password: cli.directory_bind_password,
            token_secret: cli.token_secret,
            session_secret: cli.session_secret,
            database_url: cli.database_url,
        },
    )?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    let gateway = Gateway::start(&config).await?;
    let app = warden_api::router(gateway.state.clone());

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!("Bind address: {}", config.server.bind);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
    });

    tracing::info!("Warden server started successfully");

    shutdown_signal().await;
    tracing::info!("Shutting down...");
    shutdown.cancel();

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let abort = server.abort_handle();
    match tokio::time::timeout(grace, server).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server gracefully stopped"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
        Err(_) => {
            tracing::warn!(grace_secs = grace.as_secs(), "Grace period elapsed, forcing shutdown");
            abort.abort();
        },
    }

    gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
