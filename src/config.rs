//! Configuration module for pingtrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::probe::ProbeConfig;
use crate::scheduler::{ResumePolicy, SchedulerConfig};

use std::env;

/// Upper bound for `probe_jitter_ms`.
pub const MAX_PROBE_JITTER_MS: u64 = 60_000;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pingtrail.db")
    pub db_path: String,
    /// Seconds between rounds (default: 1800)
    pub interval_secs: u64,
    /// Per-request timeout in seconds (default: 10)
    pub timeout_secs: u64,
    /// Maximum probes in flight during a round (default: 5)
    pub max_concurrency: usize,
    /// Upper bound of the random delay before each probe (default: 100)
    pub probe_jitter_ms: u64,
    pub user_agent: String,
    /// Run the first round as soon as the scheduler starts (default: true)
    pub run_on_start: bool,
    pub resume_policy: ResumePolicy,
    /// Start the scheduler when the process starts (default: true)
    pub autostart: bool,
    /// Delete results older than this many days; unset keeps everything.
    pub retention_days: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pingtrail.db".to_string(),
            interval_secs: 30 * 60,
            timeout_secs: 10,
            max_concurrency: 5,
            probe_jitter_ms: 100,
            user_agent: "pingtrail/0.1 (Monitoring Service)".to_string(),
            run_on_start: true,
            resume_policy: ResumePolicy::Restart,
            autostart: true,
            retention_days: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables (unparseable values keep the default):
    /// - `PINGTRAIL_HTTP_PORT`
    /// - `PINGTRAIL_DB_PATH`
    /// - `PINGTRAIL_INTERVAL_SECS`
    /// - `PINGTRAIL_TIMEOUT_SECS`
    /// - `PINGTRAIL_MAX_CONCURRENCY`
    /// - `PINGTRAIL_PROBE_JITTER_MS`
    /// - `PINGTRAIL_USER_AGENT`
    /// - `PINGTRAIL_RUN_ON_START`
    /// - `PINGTRAIL_RESUME_POLICY` (`restart` or `preserve_cadence`)
    /// - `PINGTRAIL_AUTOSTART`
    /// - `PINGTRAIL_RETENTION_DAYS`
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        set_parsed(&lookup, "PINGTRAIL_HTTP_PORT", &mut cfg.http_port);
        if let Some(db_path) = lookup("PINGTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }
        set_parsed(&lookup, "PINGTRAIL_INTERVAL_SECS", &mut cfg.interval_secs);
        set_parsed(&lookup, "PINGTRAIL_TIMEOUT_SECS", &mut cfg.timeout_secs);
        set_parsed(&lookup, "PINGTRAIL_MAX_CONCURRENCY", &mut cfg.max_concurrency);
        set_parsed(&lookup, "PINGTRAIL_PROBE_JITTER_MS", &mut cfg.probe_jitter_ms);
        if let Some(ua) = lookup("PINGTRAIL_USER_AGENT") {
            cfg.user_agent = ua;
        }
        set_parsed(&lookup, "PINGTRAIL_RUN_ON_START", &mut cfg.run_on_start);
        set_parsed(&lookup, "PINGTRAIL_RESUME_POLICY", &mut cfg.resume_policy);
        set_parsed(&lookup, "PINGTRAIL_AUTOSTART", &mut cfg.autostart);
        if let Some(days) = lookup("PINGTRAIL_RETENTION_DAYS").and_then(|v| v.trim().parse().ok()) {
            cfg.retention_days = Some(days).filter(|d| *d > 0);
        }

        // Zero would make the scheduler or prober unusable.
        if cfg.interval_secs == 0 {
            cfg.interval_secs = Self::default().interval_secs;
        }
        if cfg.timeout_secs == 0 {
            cfg.timeout_secs = Self::default().timeout_secs;
        }
        if cfg.max_concurrency == 0 {
            cfg.max_concurrency = Self::default().max_concurrency;
        }
        cfg.probe_jitter_ms = cfg.probe_jitter_ms.min(MAX_PROBE_JITTER_MS);

        cfg
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_concurrency: self.max_concurrency,
            user_agent: self.user_agent.clone(),
            jitter: Duration::from_millis(self.probe_jitter_ms),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.interval_secs),
            run_on_start: self.run_on_start,
            resume_policy: self.resume_policy,
        }
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key).and_then(|v| v.trim().parse().ok()) {
        *slot = value;
    }
}
