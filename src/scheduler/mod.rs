//! Scheduler: drives periodic probing rounds.
//!
//! Holds the Stopped/Running/Paused state machine. While running, a ticker
//! task fires every interval; each tick runs one round unless another round
//! is still in flight, in which case the tick is skipped.

mod retention;
mod round;

pub use retention::*;
pub use round::*;

use crate::db::{DbError, ProbeResult, Store, TargetFilter};
use crate::probe::Prober;
use crate::registry::Registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};

/// Scheduler mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerMode::Stopped => "stopped",
            SchedulerMode::Running => "running",
            SchedulerMode::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// When the first tick after `resume` fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// One full interval after the resume instant.
    #[default]
    Restart,
    /// The next slot of the cadence established by `start`.
    PreserveCadence,
}

impl FromStr for ResumePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" => Ok(ResumePolicy::Restart),
            "preserve" | "preserve_cadence" | "cadence" => Ok(ResumePolicy::PreserveCadence),
            other => Err(format!("unknown resume policy: {}", other)),
        }
    }
}

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("cannot {op} while {mode}")]
    InvalidTransition { op: &'static str, mode: SchedulerMode },
    #[error("a round is already in progress")]
    RoundInProgress,
    #[error("interval must be positive and at most one year")]
    InvalidInterval,
    #[error("round failed: {0}")]
    Round(#[from] RoundError),
}

/// Longest accepted interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn check_interval(interval: Duration) -> Result<(), SchedulerError> {
    if interval.is_zero() || interval > MAX_INTERVAL {
        return Err(SchedulerError::InvalidInterval);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Fire the first round immediately on `start` instead of after one interval.
    pub run_on_start: bool,
    pub resume_policy: ResumePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            run_on_start: true,
            resume_policy: ResumePolicy::Restart,
        }
    }
}

/// Snapshot returned by [`Scheduler::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub mode: SchedulerMode,
    pub interval_secs: f64,
    pub last_round_at: Option<DateTime<Utc>>,
    pub next_round_at: Option<DateTime<Utc>>,
    pub round_in_progress: bool,
}

struct State {
    mode: SchedulerMode,
    interval: Duration,
    last_round_at: Option<DateTime<Utc>>,
    /// First tick of the current cadence.
    anchor: Option<Instant>,
    ticker_stop: Option<broadcast::Sender<()>>,
    /// Bumped whenever the ticker is replaced; stale tickers compare unequal.
    generation: u64,
}

impl State {
    fn stop_ticker(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(tx) = self.ticker_stop.take() {
            let _ = tx.send(());
        }
    }
}

struct Inner {
    store: Arc<Store>,
    registry: Registry,
    prober: Prober,
    resume_policy: ResumePolicy,
    run_on_start: bool,
    state: Mutex<State>,
    /// Single permit: held by whichever round is executing.
    round_permit: Arc<Semaphore>,
    rounds_tx: broadcast::Sender<RoundSummary>,
}

/// Owns the scheduling state; cheap to clone and share.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a stopped scheduler.
    pub fn new(store: Arc<Store>, prober: Prober, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        check_interval(config.interval)?;

        let (rounds_tx, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(Inner {
                registry: Registry::new(store.clone()),
                store,
                prober,
                resume_policy: config.resume_policy,
                run_on_start: config.run_on_start,
                state: Mutex::new(State {
                    mode: SchedulerMode::Stopped,
                    interval: config.interval,
                    last_round_at: None,
                    anchor: None,
                    ticker_stop: None,
                    generation: 0,
                }),
                round_permit: Arc::new(Semaphore::new(1)),
                rounds_tx,
            }),
        })
    }

    /// Receive a [`RoundSummary`] after every completed round.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundSummary> {
        self.inner.rounds_tx.subscribe()
    }

    /// Stopped | Paused -> Running.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().await;
        if state.mode == SchedulerMode::Running {
            return Err(SchedulerError::InvalidTransition {
                op: "start",
                mode: state.mode,
            });
        }

        let now = Instant::now();
        let first = if self.inner.run_on_start { now } else { now + state.interval };
        self.spawn_ticker(&mut state, first);
        state.mode = SchedulerMode::Running;

        tracing::info!(
            "Scheduler: started with {:?} interval (run_on_start={})",
            state.interval,
            self.inner.run_on_start
        );
        Ok(())
    }

    /// Any -> Stopped. An in-flight round is left to finish.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().await;
        state.stop_ticker();
        state.anchor = None;
        if state.mode != SchedulerMode::Stopped {
            tracing::info!("Scheduler: stopped (was {})", state.mode);
        }
        state.mode = SchedulerMode::Stopped;
        Ok(())
    }

    /// Running -> Paused.
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().await;
        if state.mode != SchedulerMode::Running {
            return Err(SchedulerError::InvalidTransition {
                op: "pause",
                mode: state.mode,
            });
        }

        state.stop_ticker();
        state.mode = SchedulerMode::Paused;
        tracing::info!("Scheduler: paused");
        Ok(())
    }

    /// Paused -> Running, timed by the configured [`ResumePolicy`].
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().await;
        if state.mode != SchedulerMode::Paused {
            return Err(SchedulerError::InvalidTransition {
                op: "resume",
                mode: state.mode,
            });
        }

        let now = Instant::now();
        let first = match (self.inner.resume_policy, state.anchor) {
            (ResumePolicy::PreserveCadence, Some(anchor)) => next_slot(anchor, state.interval, now),
            _ => now + state.interval,
        };
        let anchor = state.anchor;
        self.spawn_ticker(&mut state, first);
        if self.inner.resume_policy == ResumePolicy::PreserveCadence {
            state.anchor = anchor.or(Some(first));
        }
        state.mode = SchedulerMode::Running;

        tracing::info!("Scheduler: resumed ({:?})", self.inner.resume_policy);
        Ok(())
    }

    /// Change the interval. A running ticker restarts on the new interval.
    pub async fn set_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        check_interval(interval)?;

        let mut state = self.inner.state.lock().await;
        state.interval = interval;
        match state.mode {
            SchedulerMode::Running => {
                let first = Instant::now() + interval;
                self.spawn_ticker(&mut state, first);
            }
            SchedulerMode::Paused => state.anchor = None,
            SchedulerMode::Stopped => {}
        }

        tracing::info!("Scheduler: interval updated to {:?}", interval);
        Ok(())
    }

    /// Run a single round now, regardless of mode. Does not touch the ticker.
    pub async fn run_once(&self) -> Result<RoundSummary, SchedulerError> {
        let _permit = self
            .inner
            .round_permit
            .clone()
            .try_acquire_owned()
            .map_err(|_| SchedulerError::RoundInProgress)?;

        tracing::info!("Scheduler: running manual round");
        Ok(self.execute_round().await?)
    }

    /// Probe a single target now and store its result.
    ///
    /// Independent of rounds: mode, ticker and `last_round_at` are untouched.
    pub async fn probe_target(&self, id: i64) -> Result<ProbeResult, DbError> {
        let target = self.inner.store.get_target(id)?;
        let mut results = self.inner.prober.probe(std::slice::from_ref(&target)).await;
        self.inner.store.append_round(&results)?;

        let result = results.pop().ok_or(DbError::NotFound)?;
        tracing::info!(
            "Scheduler: probed {} on demand (status {:?})",
            target.url,
            result.status_code
        );
        Ok(result)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock().await;
        let next_round_at = match (state.mode, state.anchor) {
            (SchedulerMode::Running, Some(anchor)) => {
                let now = Instant::now();
                let wait = next_slot(anchor, state.interval, now) - now;
                chrono::Duration::from_std(wait)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d))
            }
            _ => None,
        };

        SchedulerStatus {
            mode: state.mode,
            interval_secs: state.interval.as_secs_f64(),
            last_round_at: state.last_round_at,
            next_round_at,
            round_in_progress: self.inner.round_permit.available_permits() == 0,
        }
    }

    fn spawn_ticker(&self, state: &mut State, first: Instant) {
        state.stop_ticker();

        let (stop_tx, stop_rx) = broadcast::channel(1);
        state.ticker_stop = Some(stop_tx);
        state.anchor = Some(first);

        let scheduler = self.clone();
        let period = state.interval;
        let generation = state.generation;
        tokio::spawn(async move {
            scheduler.run_ticker(first, period, generation, stop_rx).await;
        });
    }

    async fn run_ticker(
        self,
        first: Instant,
        period: Duration,
        generation: u64,
        mut stop_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => break,
                _ = ticker.tick() => self.on_tick(generation).await,
            }
        }
    }

    async fn on_tick(&self, generation: u64) {
        {
            let state = self.inner.state.lock().await;
            if state.mode != SchedulerMode::Running || state.generation != generation {
                return;
            }
        }

        let permit = match self.inner.round_permit.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("Scheduler: skipping tick, previous round still running");
                return;
            }
        };

        let scheduler = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = scheduler.execute_round().await {
                tracing::error!("Scheduler: round abandoned: {}", e);
            }
        });
    }

    /// Snapshot, probe, persist, record. Callers must hold the round permit.
    async fn execute_round(&self) -> Result<RoundSummary, RoundError> {
        let started_at = Utc::now();
        let targets = self
            .inner
            .registry
            .list(&TargetFilter::default())
            .map_err(RoundError::Snapshot)?;

        tracing::info!("Scheduler: starting round for {} targets", targets.len());

        let results = self.inner.prober.probe(&targets).await;
        self.inner
            .store
            .append_round(&results)
            .map_err(RoundError::Persist)?;

        let finished_at = Utc::now();
        self.inner.state.lock().await.last_round_at = Some(finished_at);

        let summary = RoundSummary::build(started_at, finished_at, &targets, &results);
        tracing::info!(
            "Scheduler: round completed in {:.2}s, {}/{} successful ({}%)",
            (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
            summary.success_count,
            summary.total_targets,
            summary.success_rate
        );

        // No subscribers is fine.
        let _ = self.inner.rounds_tx.send(summary.clone());
        Ok(summary)
    }
}

/// First instant `anchor + k * period` (k >= 0) that is not before `now`.
pub fn next_slot(anchor: Instant, period: Duration, now: Instant) -> Instant {
    if now <= anchor || period.is_zero() {
        return anchor;
    }
    let elapsed = (now - anchor).as_nanos();
    let period_ns = period.as_nanos();
    let k = elapsed.div_ceil(period_ns);
    let offset = period_ns.saturating_mul(k);
    anchor + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Aggregator, Window};
    use crate::probe::ProbeConfig;
    use crate::registry::TargetInput;
    use crate::test_support::spawn_fixture;

    fn scheduler_with(store: Arc<Store>, config: SchedulerConfig, timeout: Duration) -> Scheduler {
        let prober = Prober::new(ProbeConfig {
            timeout,
            max_concurrency: 4,
            ..Default::default()
        })
        .unwrap();
        Scheduler::new(store, prober, config).unwrap()
    }

    fn idle_config() -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            run_on_start: false,
            resume_policy: ResumePolicy::Restart,
        }
    }

    #[test]
    fn test_next_slot() {
        let anchor = Instant::now();
        let period = Duration::from_secs(10);

        assert_eq!(next_slot(anchor, period, anchor), anchor);
        assert_eq!(
            next_slot(anchor, period, anchor + Duration::from_secs(3)),
            anchor + period
        );
        assert_eq!(
            next_slot(anchor, period, anchor + Duration::from_secs(20)),
            anchor + Duration::from_secs(20)
        );
        assert_eq!(
            next_slot(anchor, period, anchor + Duration::from_secs(21)),
            anchor + Duration::from_secs(30)
        );
    }

    #[test]
    fn test_resume_policy_from_str() {
        assert_eq!("restart".parse::<ResumePolicy>(), Ok(ResumePolicy::Restart));
        assert_eq!(
            "preserve_cadence".parse::<ResumePolicy>(),
            Ok(ResumePolicy::PreserveCadence)
        );
        assert!("sometimes".parse::<ResumePolicy>().is_err());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let scheduler = scheduler_with(store, idle_config(), Duration::from_secs(1));

        assert_eq!(scheduler.status().await.mode, SchedulerMode::Stopped);
        assert!(matches!(
            scheduler.pause().await,
            Err(SchedulerError::InvalidTransition { op: "pause", .. })
        ));
        assert!(scheduler.resume().await.is_err());

        scheduler.start().await.unwrap();
        let status = scheduler.status().await;
        assert_eq!(status.mode, SchedulerMode::Running);
        assert!(status.next_round_at.is_some());
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::InvalidTransition { op: "start", mode: SchedulerMode::Running })
        ));

        scheduler.pause().await.unwrap();
        let status = scheduler.status().await;
        assert_eq!(status.mode, SchedulerMode::Paused);
        assert!(status.next_round_at.is_none());
        assert_eq!(status.interval_secs, 3600.0);

        scheduler.resume().await.unwrap();
        assert_eq!(scheduler.status().await.mode, SchedulerMode::Running);

        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.status().await.mode, SchedulerMode::Stopped);
        scheduler.stop().await.unwrap();

        scheduler.start().await.unwrap();
        scheduler.pause().await.unwrap();
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.status().await.mode, SchedulerMode::Running);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_interval() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let scheduler = scheduler_with(store, idle_config(), Duration::from_secs(1));
        assert!(matches!(
            scheduler.set_interval(Duration::ZERO).await,
            Err(SchedulerError::InvalidInterval)
        ));
        scheduler.set_interval(Duration::from_secs(60)).await.unwrap();
        assert_eq!(scheduler.status().await.interval_secs, 60.0);
    }

    #[tokio::test]
    async fn test_run_once_leaves_mode_untouched() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        Registry::new(store.clone())
            .upsert(vec![
                TargetInput::new(&fx.url("/ok"), "Dev", Some("US")),
                TargetInput::new(&fx.url("/missing"), "Dev", Some("NL")),
            ])
            .unwrap();
        let scheduler = scheduler_with(store.clone(), idle_config(), Duration::from_secs(2));
        let mut rounds = scheduler.subscribe();

        let summary = scheduler.run_once().await.unwrap();
        assert_eq!(summary.total_targets, 2);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failure_count, 1);
        assert_eq!(summary.failed_targets[0].status_code, Some(404));
        assert_eq!(rounds.recv().await.unwrap(), summary);

        let status = scheduler.status().await;
        assert_eq!(status.mode, SchedulerMode::Stopped);
        assert_eq!(status.last_round_at, Some(summary.finished_at));
        assert!(!status.round_in_progress);
        assert_eq!(store.count_results().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_once_rejected_while_round_in_flight() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        Registry::new(store.clone())
            .upsert(vec![TargetInput::new(&fx.url("/slow"), "Dev", None)])
            .unwrap();
        let scheduler = scheduler_with(store.clone(), idle_config(), Duration::from_millis(500));

        let background = scheduler.clone();
        let first = tokio::spawn(async move { background.run_once().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(scheduler.status().await.round_in_progress);
        assert!(matches!(
            scheduler.run_once().await,
            Err(SchedulerError::RoundInProgress)
        ));

        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.failed_targets[0].error_message.as_deref(), Some("Timeout"));
        assert_eq!(store.count_results().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_slow_rounds_never_overlap() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        Registry::new(store.clone())
            .upsert(vec![TargetInput::new(&fx.url("/slow"), "Dev", None)])
            .unwrap();

        // Each round takes ~400ms against a 100ms interval.
        let config = SchedulerConfig {
            interval: Duration::from_millis(100),
            run_on_start: true,
            resume_policy: ResumePolicy::Restart,
        };
        let scheduler = scheduler_with(store.clone(), config, Duration::from_millis(400));
        let mut rounds = scheduler.subscribe();

        scheduler.start().await.unwrap();
        let mut summaries = Vec::new();
        while summaries.len() < 3 {
            summaries.push(rounds.recv().await.unwrap());
        }
        scheduler.stop().await.unwrap();

        for pair in summaries.windows(2) {
            assert!(pair[1].started_at >= pair[0].finished_at);
        }
    }

    #[tokio::test]
    async fn test_pause_suppresses_ticks() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        Registry::new(store.clone())
            .upsert(vec![TargetInput::new(&fx.url("/ok"), "Dev", None)])
            .unwrap();
        let config = SchedulerConfig {
            interval: Duration::from_millis(100),
            run_on_start: true,
            resume_policy: ResumePolicy::Restart,
        };
        let scheduler = scheduler_with(store.clone(), config, Duration::from_secs(1));

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        scheduler.pause().await.unwrap();
        // Let an in-flight round drain.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let paused_count = store.count_results().unwrap();
        assert!(paused_count >= 2);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.count_results().unwrap(), paused_count);

        scheduler.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        scheduler.stop().await.unwrap();
        assert!(store.count_results().unwrap() > paused_count);
    }

    #[tokio::test]
    async fn test_interval_upper_bound() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let too_long = SchedulerConfig {
            interval: MAX_INTERVAL + Duration::from_secs(1),
            ..idle_config()
        };
        let prober = Prober::new(ProbeConfig::default()).unwrap();
        assert!(matches!(
            Scheduler::new(store.clone(), prober, too_long),
            Err(SchedulerError::InvalidInterval)
        ));

        let scheduler = scheduler_with(store, idle_config(), Duration::from_secs(1));
        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler
                .set_interval(Duration::from_secs(10_000_000_000_000))
                .await,
            Err(SchedulerError::InvalidInterval)
        ));
        assert_eq!(scheduler.status().await.interval_secs, 3600.0);

        scheduler.set_interval(MAX_INTERVAL).await.unwrap();
        let status = scheduler.status().await;
        assert_eq!(status.interval_secs, MAX_INTERVAL.as_secs_f64());
        assert!(status.next_round_at.is_some());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_failure_abandons_round_and_ticking_continues() {
        let fx = spawn_fixture().await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        Registry::new(store.clone())
            .upsert(vec![TargetInput::new(&fx.url("/track"), "Dev", None)])
            .unwrap();

        // Snapshots still work, every write of results fails.
        rusqlite::Connection::open(tmp.path())
            .unwrap()
            .execute_batch("DROP TABLE probe_results;")
            .unwrap();

        let scheduler = scheduler_with(
            store.clone(),
            SchedulerConfig {
                interval: Duration::from_millis(150),
                run_on_start: true,
                resume_policy: ResumePolicy::Restart,
            },
            Duration::from_secs(1),
        );
        assert!(matches!(
            scheduler.run_once().await,
            Err(SchedulerError::Round(RoundError::Persist(_)))
        ));

        let mut rounds = scheduler.subscribe();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        let status = scheduler.status().await;
        assert_eq!(status.mode, SchedulerMode::Running);
        assert!(status.last_round_at.is_none());
        // One manual round plus several ticked ones reached the endpoint.
        assert!(fx.counters.hits.load(std::sync::atomic::Ordering::SeqCst) >= 3);
        assert!(rounds.try_recv().is_err());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_preserves_cadence() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        Registry::new(store.clone())
            .upsert(vec![TargetInput::new(&fx.url("/ok"), "Dev", None)])
            .unwrap();
        let config = SchedulerConfig {
            interval: Duration::from_secs(1),
            run_on_start: false,
            resume_policy: ResumePolicy::PreserveCadence,
        };
        let scheduler = scheduler_with(store, config, Duration::from_secs(1));
        let mut rounds = scheduler.subscribe();

        let started = Instant::now();
        scheduler.start().await.unwrap();
        let planned = scheduler.status().await.next_round_at.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.resume().await.unwrap();

        let resumed = scheduler.status().await.next_round_at.unwrap();
        assert!((resumed - planned).num_milliseconds().abs() < 50);

        // Restart would fire about 1.3s after start.
        tokio::time::timeout(Duration::from_secs(3), rounds.recv())
            .await
            .unwrap()
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900));
        assert!(elapsed < Duration::from_millis(1250));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_restarts_interval_by_default() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let scheduler = scheduler_with(store, idle_config(), Duration::from_secs(1));

        scheduler.start().await.unwrap();
        let planned = scheduler.status().await.next_round_at.unwrap();
        scheduler.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.resume().await.unwrap();

        let resumed = scheduler.status().await.next_round_at.unwrap();
        assert!((resumed - planned).num_milliseconds() >= 250);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_round_persist() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        Registry::new(store.clone())
            .upsert(vec![TargetInput::new(&fx.url("/slow"), "Dev", None)])
            .unwrap();
        let config = SchedulerConfig {
            interval: Duration::from_secs(3600),
            run_on_start: true,
            resume_policy: ResumePolicy::Restart,
        };
        let scheduler = scheduler_with(store.clone(), config, Duration::from_millis(400));

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.status().await.round_in_progress);
        scheduler.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        let status = scheduler.status().await;
        assert_eq!(status.mode, SchedulerMode::Stopped);
        assert!(status.last_round_at.is_some());
        assert!(!status.round_in_progress);
        assert_eq!(store.count_results().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_round_snapshot_ignores_mid_round_upserts() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = Registry::new(store.clone());
        registry
            .upsert(vec![TargetInput::new(&fx.url("/slow"), "Dev", None)])
            .unwrap();
        let scheduler = scheduler_with(store.clone(), idle_config(), Duration::from_millis(400));

        let background = scheduler.clone();
        let round = tokio::spawn(async move { background.run_once().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        registry
            .upsert(vec![TargetInput::new(&fx.url("/ok"), "Dev", None)])
            .unwrap();

        let summary = round.await.unwrap().unwrap();
        assert_eq!(summary.total_targets, 1);
        assert_eq!(store.count_results().unwrap(), 1);

        let next = scheduler.run_once().await.unwrap();
        assert_eq!(next.total_targets, 2);
    }

    #[tokio::test]
    async fn test_stale_ticker_cannot_fire_after_restart() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        Registry::new(store.clone())
            .upsert(vec![TargetInput::new(&fx.url("/ok"), "Dev", None)])
            .unwrap();
        let scheduler = scheduler_with(store.clone(), idle_config(), Duration::from_secs(1));

        scheduler.start().await.unwrap();
        let stale = scheduler.inner.state.lock().await.generation;
        scheduler.stop().await.unwrap();
        scheduler.start().await.unwrap();
        let current = scheduler.inner.state.lock().await.generation;
        assert_ne!(stale, current);

        scheduler.on_tick(stale).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.count_results().unwrap(), 0);

        let mut rounds = scheduler.subscribe();
        scheduler.on_tick(current).await;
        tokio::time::timeout(Duration::from_secs(2), rounds.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.count_results().unwrap(), 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_target_on_demand() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        let outcomes = Registry::new(store.clone())
            .upsert(vec![TargetInput::new(&fx.url("/missing"), "Dev", Some("US"))])
            .unwrap();
        let id = match &outcomes[0] {
            crate::registry::UpsertOutcome::Inserted { target } => target.id,
            other => panic!("unexpected outcome {:?}", other),
        };
        let scheduler = scheduler_with(store.clone(), idle_config(), Duration::from_secs(1));

        let result = scheduler.probe_target(id).await.unwrap();
        assert_eq!(result.target_id, id);
        assert_eq!(result.status_code, Some(404));
        assert!(!result.success);
        assert_eq!(store.count_results().unwrap(), 1);

        assert!(matches!(
            scheduler.probe_target(id + 100).await,
            Err(DbError::NotFound)
        ));
        let status = scheduler.status().await;
        assert_eq!(status.mode, SchedulerMode::Stopped);
        assert!(status.last_round_at.is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_round_statistics() {
        let fx = spawn_fixture().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        Registry::new(store.clone())
            .upsert(vec![
                TargetInput::new(&fx.url("/ok"), "Dev", Some("US")),
                TargetInput::new(&fx.url("/slow"), "Dev", Some("US")),
                TargetInput::new(&fx.url("/cookie"), "Dev", Some("NL")),
            ])
            .unwrap();
        let scheduler = scheduler_with(store.clone(), idle_config(), Duration::from_millis(300));

        scheduler.run_once().await.unwrap();

        let aggregator = Aggregator::new(store);
        let groups = aggregator.group_statistics(Window::Hours(1)).unwrap();
        let dev = groups.iter().find(|g| g.group == "Dev").unwrap();
        assert_eq!(dev.stats.total_urls, 3);
        assert_eq!(dev.total_countries, 2);
        assert_eq!(dev.stats.total_requests, 3);
        assert_eq!(dev.stats.success_rate, 66.7);
        assert_eq!(dev.stats.failure_rate, 33.3);

        let countries = aggregator.country_statistics("Dev", Window::Hours(1)).unwrap();
        let us = countries.iter().find(|c| c.country_code.as_deref() == Some("US")).unwrap();
        assert_eq!(us.stats.total_requests, 2);
        assert_eq!(us.stats.success_rate, 50.0);
    }
}
