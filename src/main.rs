use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use colorize_api::models::config::AppConfig;
use colorize_api::services::artifacts::ArtifactStore;
use colorize_api::services::colorizer;
use colorize_api::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone()));

    let addr = config.listen_addr.clone();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Serve immediately; /colorize answers 503 until the backend installs.
    let server = {
        let state = state.clone();
        tokio::spawn(async move {
            axum::serve(listener, app(state))
                .with_graceful_shutdown(shutdown_signal())
                .await
        })
    };

    let store = ArtifactStore::new(
        config.models_dir.as_str(),
        Duration::from_secs(config.download_timeout_secs),
    );

    let backend = match colorizer::load_backend(&config, &store).await {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, "Fatal startup error: model unavailable");
            return Err(e.into());
        }
    };
    state.colorizer.install(backend);

    server.await??;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutdown signal received, draining connections...");
}
