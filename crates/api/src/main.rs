mod config;
mod error;
mod metrics;
mod routes;
mod state;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, LogFormat};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.server.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let bind = config.server.bind.clone();
    info!(
        mode = ?config.mode,
        extractor = %config.extractor.model,
        "Starting narrative graph server"
    );

    let state = AppState::from_config(config)?;
    let app = routes::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("Server listening on http://{bind}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    state.persist().await;
    Ok(())
}
