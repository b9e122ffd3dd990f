//! driveup server entry point.

mod config;
mod routes;

use driveup_graph::Client;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting driveup server");

    let config = ServerConfig::load()?;
    if config.access_token.is_empty() {
        tracing::warn!("no access token configured; uploads will be rejected");
    }
    if config.api_keys.is_empty() {
        tracing::warn!("no API keys configured; uploads will be rejected");
    }

    let client = Client::with_timeout(&config.access_token, config.upload.request_timeout())?
        .with_base_url(config.api_base_url.clone());
    let bind = config.bind;
    let app = routes::router(AppState::new(client, config));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
