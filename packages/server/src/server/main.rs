// Main entry point for the validation API server

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::kernel::CommandCrawler;
use server_core::server::{build_app, AppState};
use server_core::{Config, CrawlerSource};
use tagcheck_core::{CrawlSubsystem, DatasetFileCrawler, RunController, ValidatorRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,tagcheck_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tag validation API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    let registry = ValidatorRegistry::with_defaults(&config.validator_settings)
        .context("Invalid validator settings")?;
    tracing::info!(validators = registry.len(), "Validator registry ready");

    let crawler: Arc<dyn CrawlSubsystem> = match config
        .crawler_source()
        .context("No crawl subsystem configured")?
    {
        CrawlerSource::Command(command) => {
            tracing::info!(command = %command, "Using external crawl command");
            Arc::new(CommandCrawler::new(&command, config.capture_patterns.clone()))
        }
        CrawlerSource::Replay(path) => {
            tracing::info!(path = %path.display(), "Replaying captured dataset for every run");
            Arc::new(DatasetFileCrawler::new(path))
        }
    };

    // Build application
    let controller = RunController::new(Arc::new(registry), crawler);
    let app = build_app(
        AppState::new(controller, config.default_bounds),
        &config.allowed_origins,
    );

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/api/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
