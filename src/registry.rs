//! Target registry: validated import and listing of monitored endpoints.

use crate::db::{DbError, NewTarget, Store, Target, TargetFilter};

use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use thiserror::Error;

/// Why an import row was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("url is empty")]
    EmptyUrl,
    #[error("group is empty")]
    EmptyGroup,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl Serialize for ImportError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One raw import row as supplied by an external import mechanism.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetInput {
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "group_name")]
    pub group: String,
    #[serde(default, alias = "countryCode")]
    pub country_code: Option<String>,
}

impl TargetInput {
    pub fn new(url: &str, group: &str, country_code: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            group: group.to_string(),
            country_code: country_code.map(str::to_string),
        }
    }

    /// Validate and normalize the row.
    ///
    /// Urls without a scheme get `https://`. A blank country code means none.
    pub fn validate(self) -> Result<NewTarget, ImportError> {
        let url = self.url.trim();
        let group = self.group.trim();

        if url.is_empty() {
            return Err(ImportError::EmptyUrl);
        }
        if group.is_empty() {
            return Err(ImportError::EmptyGroup);
        }
        if url.chars().any(char::is_whitespace) {
            return Err(ImportError::InvalidUrl(url.to_string()));
        }

        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.contains("://") {
            return Err(ImportError::InvalidUrl(url.to_string()));
        } else {
            format!("https://{}", url)
        };

        if url.trim_start_matches("http://").trim_start_matches("https://").is_empty() {
            return Err(ImportError::InvalidUrl(url));
        }

        let country_code = self
            .country_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(NewTarget {
            url,
            group: group.to_string(),
            country_code,
        })
    }
}

/// Per-row result of [`Registry::upsert`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted { target: Target },
    Unchanged { target: Target },
    Rejected { row: usize, reason: ImportError },
}

/// Holds the set of monitored endpoints.
#[derive(Clone)]
pub struct Registry {
    store: Arc<Store>,
}

impl Registry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Insert new (url, group, country) tuples and leave existing ones alone.
    ///
    /// Invalid rows are reported and skipped; valid rows are written in a
    /// single transaction. Outcomes are returned in input order.
    pub fn upsert(&self, rows: Vec<TargetInput>) -> Result<Vec<UpsertOutcome>, DbError> {
        let mut outcomes: Vec<Option<UpsertOutcome>> = Vec::with_capacity(rows.len());
        let mut valid = Vec::new();
        let mut valid_idx = Vec::new();

        for (row, input) in rows.into_iter().enumerate() {
            match input.validate() {
                Ok(t) => {
                    valid_idx.push(row);
                    valid.push(t);
                    outcomes.push(None);
                }
                Err(reason) => {
                    tracing::warn!("Registry: rejected import row {}: {}", row, reason);
                    outcomes.push(Some(UpsertOutcome::Rejected { row, reason }));
                }
            }
        }

        let stored = self.store.upsert_targets(&valid)?;
        let mut inserted = 0;
        for (row, (target, is_new)) in valid_idx.into_iter().zip(stored) {
            outcomes[row] = Some(if is_new {
                inserted += 1;
                UpsertOutcome::Inserted { target }
            } else {
                UpsertOutcome::Unchanged { target }
            });
        }

        tracing::info!(
            "Registry: import of {} rows, {} inserted, {} rejected",
            outcomes.len(),
            inserted,
            outcomes
                .iter()
                .filter(|o| matches!(o, Some(UpsertOutcome::Rejected { .. })))
                .count()
        );

        Ok(outcomes.into_iter().flatten().collect())
    }

    /// All targets matching `filter`, ordered by (group, country, url).
    pub fn list(&self, filter: &TargetFilter) -> Result<Vec<Target>, DbError> {
        self.store.list_targets(filter)
    }
}
