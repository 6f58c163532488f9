//! pingtrail - HTTP endpoint monitoring service.

use pingtrail::aggregate::Aggregator;
use pingtrail::config::ServerConfig;
use pingtrail::db::Store;
use pingtrail::probe::Prober;
use pingtrail::registry::Registry;
use pingtrail::scheduler::{RetentionManager, Scheduler};
use pingtrail::web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingtrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pingtrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let prober = Prober::new(cfg.probe_config())?;
    let scheduler = Arc::new(Scheduler::new(store.clone(), prober, cfg.scheduler_config())?);

    // Log round summaries
    let mut rounds = scheduler.subscribe();
    tokio::spawn(async move {
        while let Ok(summary) = rounds.recv().await {
            if summary.failure_count > 0 {
                tracing::warn!(
                    "Round: {} of {} targets failed",
                    summary.failure_count,
                    summary.total_targets
                );
            }
        }
    });

    if cfg.autostart {
        scheduler.start().await?;
    } else {
        tracing::info!("Scheduler autostart disabled; waiting for POST /api/scheduler/start");
    }

    let retention = cfg
        .retention_days
        .map(|days| RetentionManager::new(store.clone(), days));
    if let Some(manager) = &retention {
        manager.start().await;
    }

    // Start web server
    let state = AppState {
        config: cfg,
        registry: Arc::new(Registry::new(store.clone())),
        aggregator: Arc::new(Aggregator::new(store.clone())),
        scheduler,
        store,
    };
    let server = Server::new(state);
    server.start().await?;

    Ok(())
}
