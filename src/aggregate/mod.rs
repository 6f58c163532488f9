//! Aggregator: read-side statistics over the probe log.
//!
//! Every query reads raw rows through [`Store::query_window`] and folds them
//! in memory, so a query only ever sees fully committed rounds.

mod window;

pub use window::*;

use crate::db::{AnnotatedResult, DbError, ProbeResult, Store, Target, TargetFilter};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Request counts and rates shared by group and country statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestStats {
    pub total_urls: usize,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    /// Mean over every result carrying a response time (2xx and non-2xx).
    pub avg_response_time_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub group: String,
    pub total_countries: usize,
    #[serde(flatten)]
    pub stats: RequestStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryStats {
    pub country_code: Option<String>,
    /// Country code, or "Unknown".
    pub country: String,
    #[serde(flatten)]
    pub stats: RequestStats,
}

/// All results of one target, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetHistory {
    pub target: Target,
    pub results: Vec<ProbeResult>,
}

/// group -> country label -> latest result per target.
pub type GroupedStatus = BTreeMap<String, BTreeMap<String, Vec<AnnotatedResult>>>;

#[derive(Default)]
struct Tally {
    total: usize,
    successful: usize,
    rt_sum: f64,
    rt_count: usize,
}

impl Tally {
    fn add(&mut self, r: &ProbeResult) {
        self.total += 1;
        if r.success {
            self.successful += 1;
        }
        if let Some(rt) = r.response_time_ms {
            self.rt_sum += rt;
            self.rt_count += 1;
        }
    }

    fn finish(&self, total_urls: usize) -> RequestStats {
        let success_rate = percentage(self.successful, self.total);
        let failure_rate = if self.total == 0 { 0.0 } else { round1(100.0 - success_rate) };
        RequestStats {
            total_urls,
            total_requests: self.total,
            successful_requests: self.successful,
            failed_requests: self.total - self.successful,
            success_rate,
            failure_rate,
            avg_response_time_ms: (self.rt_count > 0)
                .then(|| round1(self.rt_sum / self.rt_count as f64)),
        }
    }
}

/// `part / total * 100` rounded to one decimal, 0 for an empty total.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(part as f64 / total as f64 * 100.0)
    }
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Stateless query layer over a [`Store`].
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<Store>,
}

impl Aggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Latest result per target inside the window, by group then country.
    pub fn latest_status_by_group(&self, window: Window) -> Result<GroupedStatus, DbError> {
        let rows = self.store.query_window(window.hours())?;
        let mut seen = HashSet::new();
        let mut grouped: GroupedStatus = BTreeMap::new();

        // Rows arrive newest first, so the first row per target is its latest.
        for row in rows {
            if !seen.insert(row.result.target_id) {
                continue;
            }
            grouped
                .entry(row.group.clone())
                .or_default()
                .entry(row.country_label().to_string())
                .or_default()
                .push(row);
        }

        for countries in grouped.values_mut() {
            for entries in countries.values_mut() {
                entries.sort_by(|a, b| a.url.cmp(&b.url));
            }
        }
        Ok(grouped)
    }

    /// Per-group statistics for every registered group.
    pub fn group_statistics(&self, window: Window) -> Result<Vec<GroupStats>, DbError> {
        let targets = self.store.list_targets(&TargetFilter::default())?;
        let rows = self.store.query_window(window.hours())?;

        let mut urls: BTreeMap<&str, usize> = BTreeMap::new();
        let mut countries: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for t in &targets {
            *urls.entry(t.group.as_str()).or_default() += 1;
            let set = countries.entry(t.group.as_str()).or_default();
            if let Some(cc) = t.country_code.as_deref() {
                set.insert(cc);
            }
        }

        let mut tallies: HashMap<&str, Tally> = HashMap::new();
        for row in &rows {
            tallies.entry(row.group.as_str()).or_default().add(&row.result);
        }

        let empty = Tally::default();
        Ok(urls
            .into_iter()
            .map(|(group, total_urls)| GroupStats {
                group: group.to_string(),
                total_countries: countries.get(group).map_or(0, BTreeSet::len),
                stats: tallies.get(group).unwrap_or(&empty).finish(total_urls),
            })
            .collect())
    }

    /// Per-country statistics inside one group. Countries are ordered with
    /// the unknown country first.
    pub fn country_statistics(&self, group: &str, window: Window) -> Result<Vec<CountryStats>, DbError> {
        let filter = TargetFilter {
            group: Some(group.to_string()),
            country_code: None,
        };
        let targets = self.store.list_targets(&filter)?;
        let rows = self.store.query_window(window.hours())?;

        let mut urls: BTreeMap<Option<&str>, usize> = BTreeMap::new();
        for t in &targets {
            *urls.entry(t.country_code.as_deref()).or_default() += 1;
        }

        let mut tallies: HashMap<Option<&str>, Tally> = HashMap::new();
        for row in rows.iter().filter(|r| r.group == group) {
            tallies
                .entry(row.country_code.as_deref())
                .or_default()
                .add(&row.result);
        }

        let empty = Tally::default();
        Ok(urls
            .into_iter()
            .map(|(cc, total_urls)| CountryStats {
                country_code: cc.map(str::to_string),
                country: cc.unwrap_or(crate::db::UNKNOWN_COUNTRY).to_string(),
                stats: tallies.get(&cc).unwrap_or(&empty).finish(total_urls),
            })
            .collect())
    }

    /// Failed results in the window, newest first.
    ///
    /// A result is failed when it has no status code or a non-2xx one.
    pub fn failed_requests(&self, window: Window) -> Result<Vec<AnnotatedResult>, DbError> {
        Ok(self
            .store
            .query_window(window.hours())?
            .into_iter()
            .filter(|r| !r.result.success)
            .collect())
    }

    /// Every result of the targets in `group` with the given country, grouped
    /// by target. `None` selects targets without a country code.
    pub fn all_requests_for_target(
        &self,
        group: &str,
        country_code: Option<&str>,
        window: Window,
    ) -> Result<Vec<TargetHistory>, DbError> {
        let targets: Vec<Target> = self
            .store
            .list_targets(&TargetFilter {
                group: Some(group.to_string()),
                country_code: None,
            })?
            .into_iter()
            .filter(|t| t.country_code.as_deref() == country_code)
            .collect();

        let mut by_target: HashMap<i64, Vec<ProbeResult>> =
            targets.iter().map(|t| (t.id, Vec::new())).collect();
        for row in self.store.query_window(window.hours())? {
            if let Some(results) = by_target.get_mut(&row.result.target_id) {
                results.push(row.result);
            }
        }

        Ok(targets
            .into_iter()
            .map(|target| {
                let results = by_target.remove(&target.id).unwrap_or_default();
                TargetHistory { target, results }
            })
            .collect())
    }

    /// Totals across every group.
    pub fn overview(&self, window: Window) -> Result<RequestStats, DbError> {
        let total_urls = self.store.list_targets(&TargetFilter::default())?.len();
        let mut tally = Tally::default();
        for row in self.store.query_window(window.hours())? {
            tally.add(&row.result);
        }
        Ok(tally.finish(total_urls))
    }
}
