//! Prober: one bounded-concurrency batch of HTTP checks.

mod http;

pub use http::*;

use crate::db::{ProbeResult, Target};

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// How a single check ended. Transport failures are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// A response arrived, whatever its status.
    Response { status: u16, elapsed: Duration },
    Timeout,
    ConnectionError,
    TlsError,
    Other(String),
}

impl ProbeOutcome {
    /// Human-readable failure category, `None` when a response arrived.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ProbeOutcome::Response { .. } => None,
            ProbeOutcome::Timeout => Some("Timeout".to_string()),
            ProbeOutcome::ConnectionError => Some("Connection error".to_string()),
            ProbeOutcome::TlsError => Some("SSL error".to_string()),
            ProbeOutcome::Other(detail) => Some(format!("Request error: {}", detail)),
        }
    }

    pub fn into_result(self, target_id: i64, timestamp: DateTime<Utc>) -> ProbeResult {
        match self {
            ProbeOutcome::Response { status, elapsed } => {
                ProbeResult::responded(target_id, timestamp, status, millis(elapsed))
            }
            other => {
                let message = other.error_message().unwrap_or_default();
                ProbeResult::failed(target_id, timestamp, message)
            }
        }
    }
}

/// Milliseconds rounded to two decimals.
fn millis(d: Duration) -> f64 {
    (d.as_secs_f64() * 100_000.0).round() / 100.0
}

/// Prober configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub max_concurrency: usize,
    pub user_agent: String,
    /// Upper bound of the random delay before each probe starts.
    pub jitter: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_concurrency: 5,
            user_agent: "pingtrail/0.1 (Monitoring Service)".to_string(),
            jitter: Duration::ZERO,
        }
    }
}

/// Executes batches of HTTP checks with a shared client.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        if config.max_concurrency == 0 {
            return Err(ProbeError::Config("max_concurrency must be at least 1".to_string()));
        }
        if config.timeout.is_zero() {
            return Err(ProbeError::Config("timeout must be positive".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client, config })
    }

    /// Probe every target once, at most `max_concurrency` at a time.
    ///
    /// Returns one result per target in input order, all stamped with the
    /// batch start time. Never returns fewer results than targets.
    pub async fn probe(&self, targets: &[Target]) -> Vec<ProbeResult> {
        let started = Utc::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut set = JoinSet::new();

        for (idx, target) in targets.iter().cloned().enumerate() {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            let timeout = self.config.timeout;
            let jitter = self.config.jitter;

            set.spawn(async move {
                if !jitter.is_zero() {
                    let bound = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
                    let ms = rand::thread_rng().gen_range(0..=bound);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, run_http_probe(&client, &target, timeout).await)
            });
        }

        let mut outcomes: Vec<Option<ProbeOutcome>> = vec![None; targets.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => tracing::error!("Prober: probe task failed: {}", e),
            }
        }

        targets
            .iter()
            .zip(outcomes)
            .map(|(target, outcome)| {
                outcome
                    .unwrap_or_else(|| ProbeOutcome::Other("probe task failed".to_string()))
                    .into_result(target.id, started)
            })
            .collect()
    }
}
