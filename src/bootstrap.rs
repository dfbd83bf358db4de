use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::openapi::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::shutdown::ShutdownTrigger;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Loads `.env` if there is one.
pub fn init_env() {
    if let Err(err) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", err);
    }
}

/// Swagger UI at `/swagger-ui`, backed by the generated document.
pub fn create_swagger_ui(openapi: OpenApi) -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi)
}

/// Serves `app` until Ctrl-C, then fires `shutdown` so background workers stop too.
pub async fn serve(name: &str, app: Router, port: u16, shutdown: ShutdownTrigger) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    tracing::info!("{} listening on {}", name, listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", err);
            }
            tracing::info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    shutdown.trigger();
    tracing::info!("{} stopped", name);
    Ok(())
}
