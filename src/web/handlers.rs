//! HTTP request handlers.

use super::{ApiError, AppState};
use crate::aggregate::{CountryStats, GroupStats, GroupedStatus, RequestStats, TargetHistory, Window};
use crate::db::{self, AnnotatedResult, ProbeResult, Target, TargetFilter, UNKNOWN_COUNTRY};
use crate::registry::{TargetInput, UpsertOutcome};
use crate::scheduler::{RoundSummary, SchedulerStatus};

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    #[serde(default)]
    pub filter: Option<String>,
}

impl WindowQuery {
    fn window(&self) -> Result<Window, ApiError> {
        match self.filter.as_deref() {
            None | Some("") => Ok(Window::default()),
            Some(token) => Ok(token.parse()?),
        }
    }
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(
    State(state): State<AppState>,
    Query(filter): Query<TargetFilter>,
) -> ApiResult<Vec<Target>> {
    Ok(Json(state.registry.list(&filter)?))
}

pub async fn handle_upsert_targets(
    State(state): State<AppState>,
    Json(rows): Json<Vec<TargetInput>>,
) -> ApiResult<Vec<UpsertOutcome>> {
    Ok(Json(state.registry.upsert(rows)?))
}

/// Probe one target now and store the result, outside of any round.
pub async fn handle_probe_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ProbeResult> {
    Ok(Json(state.scheduler.probe_target(id).await?))
}

// ============================================================================
// API: Scheduler control
// ============================================================================

pub async fn handle_scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

pub async fn handle_scheduler_start(State(state): State<AppState>) -> ApiResult<SchedulerStatus> {
    state.scheduler.start().await?;
    Ok(Json(state.scheduler.status().await))
}

pub async fn handle_scheduler_stop(State(state): State<AppState>) -> ApiResult<SchedulerStatus> {
    state.scheduler.stop().await?;
    Ok(Json(state.scheduler.status().await))
}

pub async fn handle_scheduler_pause(State(state): State<AppState>) -> ApiResult<SchedulerStatus> {
    state.scheduler.pause().await?;
    Ok(Json(state.scheduler.status().await))
}

pub async fn handle_scheduler_resume(State(state): State<AppState>) -> ApiResult<SchedulerStatus> {
    state.scheduler.resume().await?;
    Ok(Json(state.scheduler.status().await))
}

pub async fn handle_scheduler_run(State(state): State<AppState>) -> ApiResult<RoundSummary> {
    Ok(Json(state.scheduler.run_once().await?))
}

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub secs: u64,
}

pub async fn handle_scheduler_interval(
    State(state): State<AppState>,
    Json(req): Json<IntervalRequest>,
) -> ApiResult<SchedulerStatus> {
    state.scheduler.set_interval(Duration::from_secs(req.secs)).await?;
    Ok(Json(state.scheduler.status().await))
}

// ============================================================================
// API: Statistics
// ============================================================================

/// Raw results in the window, newest first.
pub async fn handle_ping_results(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<AnnotatedResult>> {
    Ok(Json(state.store.query_window(query.window()?.hours())?))
}

pub async fn handle_stats(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<RequestStats> {
    Ok(Json(state.aggregator.overview(query.window()?)?))
}

pub async fn handle_grouped_results(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<GroupedStatus> {
    Ok(Json(state.aggregator.latest_status_by_group(query.window()?)?))
}

pub async fn handle_group_statistics(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<GroupStats>> {
    Ok(Json(state.aggregator.group_statistics(query.window()?)?))
}

pub async fn handle_country_statistics(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<CountryStats>> {
    Ok(Json(state.aggregator.country_statistics(&group, query.window()?)?))
}

pub async fn handle_failed_requests(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<AnnotatedResult>> {
    Ok(Json(state.aggregator.failed_requests(query.window()?)?))
}

/// `Unknown` in the path selects targets without a country code.
pub async fn handle_country_requests(
    State(state): State<AppState>,
    Path((group, country)): Path<(String, String)>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<TargetHistory>> {
    let country = (country != UNKNOWN_COUNTRY).then_some(country.as_str());
    Ok(Json(
        state
            .aggregator
            .all_requests_for_target(&group, country, query.window()?)?,
    ))
}

// ============================================================================
// API: Maintenance
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    /// Keep results newer than this; purge everything when absent.
    #[serde(default)]
    pub older_than_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub deleted: usize,
}

pub async fn handle_purge(
    State(state): State<AppState>,
    Json(req): Json<PurgeRequest>,
) -> ApiResult<PurgeResponse> {
    let deleted = match req.older_than_days {
        Some(days) => {
            let cutoff = db::cutoff(ChronoDuration::days(i64::from(days)));
            state.store.delete_results_before(cutoff)?
        }
        None => state.store.clear_results()?,
    };
    tracing::info!("Maintenance: purged {} results", deleted);
    Ok(Json(PurgeResponse { deleted }))
}
