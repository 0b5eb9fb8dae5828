//! bookstore-server: HTTP API process

use bookstore_server::{AppState, Config, api, logger};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    logger::init_logger(&config.log_level, config.log_json, config.log_dir.as_deref())?;
    tracing::info!(environment = %config.environment, "Starting bookstore-server");
    if config.is_development() {
        tracing::warn!("Development environment: unset secrets fall back to placeholders");
    }

    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let state = AppState::from_config(config).await?;
    let app = api::build_app(state);

    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP listening on {http_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("bookstore-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
