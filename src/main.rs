use anyhow::{Context, Result};
use local_translate::config::Config;
use local_translate::server::{router, AppState};
use local_translate::service::TranslationService;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when the variables come from the environment)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("local_translate=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;

    info!("Starting translation server");
    info!("Package store: {}", config.package_dir.display());
    info!("Pivot language: {}", config.pivot_language);

    let service = Arc::new(TranslationService::from_config(&config)?);
    let installed = service.languages();
    info!(
        "{} language pair(s) translatable without downloads; more are installed on first use",
        installed.len()
    );

    let app = router(AppState { service });

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
