//! # Observations API - Main Entry Point
//!
//! Loads configuration, initialises logging and metrics, prepares the database and the
//! message broker, then serves the HTTP API until SIGINT or SIGTERM.
//!
//! ## Commands
//!
//! - `serve` (default): run pending migrations when enabled, then serve
//! - `migrate`: run pending migrations and exit

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use observations_api::core::config::{DatabaseBackend, MessagingBackend, ServiceConfig};
use observations_api::messaging::{EventPublisher, LogPublisher, NatsPublisher};
use observations_api::observability::{init_logging, metrics};
use observations_api::observations::{
    InMemoryObservationStore, ObservationService, ObservationStore, PostgresObservationStore,
};
use observations_api::server::{self, AppState};

#[derive(Parser)]
#[command(name = "observations-api")]
#[command(about = "Clinical observation set service", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML configuration file; environment variables override its values
    #[arg(short, long, env = "OBSERVATIONS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run database migrations, then serve the API
    Serve,
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ServiceConfig::load_from_file(path)
            .await
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ServiceConfig::from_env().context("loading configuration from environment")?,
    };

    init_logging(&config.observability.logging)?;

    info!("🚀 Starting Observations API");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.environment);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => migrate(&config).await,
        Commands::Serve => serve(config).await,
    }
}

async fn migrate(config: &ServiceConfig) -> anyhow::Result<()> {
    if config.database.backend != DatabaseBackend::Postgres {
        warn!("⚠️  In-memory store selected, nothing to migrate");
        return Ok(());
    }

    let store = PostgresObservationStore::connect(&config.database).await?;
    store.run_migrations().await?;
    info!("✅ Database migrations complete");
    Ok(())
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let store: Arc<dyn ObservationStore> = match config.database.backend {
        DatabaseBackend::Postgres => {
            let store = PostgresObservationStore::connect(&config.database).await?;
            if config.database.run_migrations {
                info!("🗄️  Running database migrations...");
                store.run_migrations().await?;
            }
            Arc::new(store)
        }
        DatabaseBackend::Memory => {
            warn!("⚠️  Using the in-memory store, data is lost on restart");
            Arc::new(InMemoryObservationStore::new())
        }
    };

    let nats = match config.messaging.backend {
        MessagingBackend::Nats => Some(Arc::new(NatsPublisher::connect(&config.messaging).await?)),
        MessagingBackend::Log => None,
    };
    let publisher: Arc<dyn EventPublisher> = match &nats {
        Some(nats) => nats.clone(),
        None => {
            warn!("⚠️  Message broker disabled, events are only logged");
            Arc::new(LogPublisher)
        }
    };

    let metrics_handle = if config.observability.metrics.enabled {
        info!("📊 Prometheus metrics on {}", config.observability.metrics.endpoint);
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let service = Arc::new(ObservationService::new(store, publisher, config.environment));
    let app = server::build_router(AppState::new(service), &config, metrics_handle);

    let result = server::serve(app, &config.server).await;

    if let Some(nats) = nats {
        info!("📤 Flushing pending events...");
        if let Err(e) = nats.flush().await {
            error!("Failed to flush events: {}", e);
        }
    }

    result?;
    info!("✅ Observations API shutdown complete");
    Ok(())
}
