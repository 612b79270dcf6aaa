//! Main entry point for the image generation task dispatcher

use gen_task_dispatcher::{
    api,
    config::{LoggingConfig, Settings},
    provider::ProviderRegistry,
    storage::FileStorage,
    task::MemoryTaskStore,
    AppState,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("pretty") {
        registry.with(fmt::layer()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => warn!(error = %err, "Unable to listen for shutdown signal"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;

    init_tracing(&settings.logging);
    info!("Starting image generation task dispatcher");
    info!(
        "Loaded configuration: server={}:{}",
        settings.server.host, settings.server.port
    );

    let registry = ProviderRegistry::from_settings(&settings)?;
    if registry.is_empty() {
        warn!("No providers configured; every submission will be rejected");
    }

    let storage = FileStorage::from_config(&settings.storage);
    storage.ensure_storage_dir().await?;

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let grace = settings.pool.shutdown_grace();

    let app_state = Arc::new(AppState::new(
        settings,
        registry,
        Arc::new(MemoryTaskStore::new()),
        Arc::new(storage),
    ));

    let app = api::create_router(app_state.clone());

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.pool.shutdown(grace).await;
    info!("Shutdown complete");

    Ok(())
}
