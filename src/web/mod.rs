//! Web server module.

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::*;

use crate::aggregate::Aggregator;
use crate::config::ServerConfig;
use crate::db::Store;
use crate::registry::Registry;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
    pub scheduler: Arc<Scheduler>,
    pub aggregator: Arc<Aggregator>,
}

/// Build the API router over `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        // Targets
        .route(
            "/api/targets",
            get(handlers::handle_get_targets).post(handlers::handle_upsert_targets),
        )
        .route("/api/targets/{id}/probe", post(handlers::handle_probe_target))
        // Scheduler control
        .route("/api/scheduler", get(handlers::handle_scheduler_status))
        .route("/api/scheduler/start", post(handlers::handle_scheduler_start))
        .route("/api/scheduler/stop", post(handlers::handle_scheduler_stop))
        .route("/api/scheduler/pause", post(handlers::handle_scheduler_pause))
        .route("/api/scheduler/resume", post(handlers::handle_scheduler_resume))
        .route("/api/scheduler/run", post(handlers::handle_scheduler_run))
        .route("/api/scheduler/interval", put(handlers::handle_scheduler_interval))
        // Results and statistics
        .route("/api/ping-results", get(handlers::handle_ping_results))
        .route("/api/stats", get(handlers::handle_stats))
        .route("/api/grouped-results", get(handlers::handle_grouped_results))
        .route("/api/group-statistics", get(handlers::handle_group_statistics))
        .route(
            "/api/country-statistics/{group}",
            get(handlers::handle_country_statistics),
        )
        .route("/api/failed-requests", get(handlers::handle_failed_requests))
        .route(
            "/api/groups/{group}/countries/{country}/requests",
            get(handlers::handle_country_requests),
        )
        // Maintenance
        .route("/api/maintenance/purge", post(handlers::handle_purge))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}

/// Web server for pingtrail.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = router(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
