//! One probing round and the summary it publishes.

use crate::aggregate::{percentage, round1};
use crate::db::{DbError, ProbeResult, Target};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Why a round was abandoned. Nothing from an abandoned round is kept.
#[derive(Error, Debug)]
pub enum RoundError {
    #[error("failed to snapshot targets: {0}")]
    Snapshot(DbError),
    #[error("failed to persist results: {0}")]
    Persist(DbError),
}

/// A target that failed during a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTarget {
    pub url: String,
    pub group: String,
    pub country_code: Option<String>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

/// Published after every completed round, for notification sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_targets: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    /// Mean latency of the successful probes.
    pub avg_response_time_ms: Option<f64>,
    pub failed_targets: Vec<FailedTarget>,
}

impl RoundSummary {
    pub fn build(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        targets: &[Target],
        results: &[ProbeResult],
    ) -> Self {
        let by_id: HashMap<i64, &Target> = targets.iter().map(|t| (t.id, t)).collect();

        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;

        let times: Vec<f64> = results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.response_time_ms)
            .collect();
        let avg_response_time_ms = if times.is_empty() {
            None
        } else {
            Some(round1(times.iter().sum::<f64>() / times.len() as f64))
        };

        let failed_targets = results
            .iter()
            .filter(|r| !r.success)
            .filter_map(|r| {
                by_id.get(&r.target_id).map(|t| FailedTarget {
                    url: t.url.clone(),
                    group: t.group.clone(),
                    country_code: t.country_code.clone(),
                    status_code: r.status_code,
                    error_message: r.error_message.clone(),
                })
            })
            .collect();

        Self {
            started_at,
            finished_at,
            total_targets: targets.len(),
            success_count,
            failure_count,
            success_rate: percentage(success_count, results.len()),
            avg_response_time_ms,
            failed_targets,
        }
    }
}
