use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use service_directoryd::api;
use service_directoryd::checker::{self, AvailabilityChecker};
use service_directoryd::config::Config;
use service_directoryd::registry::ServiceRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("service_directoryd=info"))
        )
        .init();

    tracing::info!("Starting service-directoryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/service-directory/directoryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Registry with preloaded services
    let registry = Arc::new(ServiceRegistry::new());
    for service in config.services.iter().cloned() {
        registry
            .register(service)
            .context("Failed to register preloaded service")?;
    }
    tracing::info!("Registered {} preloaded services", registry.len());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn availability checker task
    let checker = Arc::new(AvailabilityChecker::new(registry.clone(), config.checker.clone())?);
    let checker_cancel = cancel.clone();
    let checker_handle = tokio::spawn(async move {
        if let Err(e) = checker::run(checker, checker_cancel).await {
            tracing::error!("Availability checker error: {}", e);
        }
    });

    // Build API router
    let app_state = api::routes::AppState {
        registry: registry.clone(),
        self_info: Arc::new(config.directory.to_record()),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    // Wait for all tasks to complete; in-flight probes end within their timeout
    let _ = tokio::join!(checker_handle, server_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}
