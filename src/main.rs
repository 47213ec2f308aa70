use civic_priority::{
    api::{build_router, AppState},
    config::Config,
    ml::{ArtifactStore, PredictionService},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "civic_priority=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Civic Priority v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        artifacts = %config.artifacts.root.display(),
        model = %config.serving.model_name,
        "Serving configuration resolved"
    );

    // Load the model before accepting traffic
    let store = ArtifactStore::new(&config.artifacts.root);
    let service = Arc::new(PredictionService::new(
        store,
        config.serving.model_name.clone(),
        config.serving.high_priority_label.clone(),
    ));
    let warm = service.clone();
    tokio::task::spawn_blocking(move || warm.warm_up()).await??;
    tracing::info!("Model {} ready", config.serving.model_name);

    let app = build_router(AppState::new(service));

    // Start HTTP server
    let http_addr = format!("{}:{}", config.serving.host, config.serving.port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Predict: http://{}/predict", http_addr);

    axum::serve(http_listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
        })
        .await?;

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
