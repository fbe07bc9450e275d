//! forge-server – HTTP entry point.
//!
//! Startup order:
//! 1. Parse CLI flags and load the TOML config file.
//! 2. Initialise structured tracing.
//! 3. Build the `forge-server` composition root (Store + Pool + engines).
//! 4. Build the Axum router and serve with graceful shutdown.

mod config;
mod error;
mod routes;
mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use forge_engine::EngineAdapter;
use tracing::{info, warn};

use crate::config::{Cli, FileConfig};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).init();

    info!(version = env!("CARGO_PKG_VERSION"), "forge-server starting");

    let file_config = FileConfig::load(&cli.config)?;
    let enable_swagger = file_config.enable_swagger;
    let cors_allowed_origins = file_config.cors_allowed_origins.clone();
    let server_config = file_config.into_server_config(&cli);

    let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    engines.insert("builtin.echo".into(), Arc::new(forge_engines_builtin::EchoEngine::new()));

    let server = forge_server::InferenceServer::start(server_config, engines).await?;
    info!("forge-server runtime initialised");

    let state = Arc::new(AppState { server, enable_swagger, cors_allowed_origins });

    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cli.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    state.server.stop().await;
    info!("forge-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
