//! SQLite database store implementation.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("Not found")]
    NotFound,
}

/// Thread-safe database store.
///
/// All access goes through one connection behind a mutex, so a round written
/// by [`Store::append_round`] is either fully visible to readers or not at all.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// In-memory store, mostly useful for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Targets ---

    /// Insert each target unless its (url, group, country) tuple exists.
    ///
    /// Returns the stored target and whether it was newly inserted, in input
    /// order. The whole batch is one transaction.
    pub fn upsert_targets(&self, targets: &[NewTarget]) -> Result<Vec<(Target, bool)>, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut out = Vec::with_capacity(targets.len());

        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO targets (url, group_name, country_code) VALUES (?1, ?2, ?3)",
            )?;
            let mut lookup = tx.prepare(
                "SELECT id FROM targets
                 WHERE url = ?1 AND group_name = ?2 AND COALESCE(country_code, '') = COALESCE(?3, '')",
            )?;

            for t in targets {
                let inserted = insert.execute(params![t.url, t.group, t.country_code])? == 1;
                let id: i64 = if inserted {
                    tx.last_insert_rowid()
                } else {
                    lookup.query_row(params![t.url, t.group, t.country_code], |row| row.get(0))?
                };
                out.push((
                    Target {
                        id,
                        url: t.url.clone(),
                        group: t.group.clone(),
                        country_code: t.country_code.clone(),
                    },
                    inserted,
                ));
            }
        }

        tx.commit()?;
        Ok(out)
    }

    /// List targets ordered by (group, country, url).
    pub fn list_targets(&self, filter: &TargetFilter) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, url, group_name, country_code FROM targets
             WHERE (?1 IS NULL OR group_name = ?1)
               AND (?2 IS NULL OR country_code = ?2)
             ORDER BY group_name, country_code, url",
        )?;

        let targets = stmt
            .query_map(params![filter.group, filter.country_code], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, url, group_name, country_code FROM targets WHERE id = ?1",
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    // --- Probe results ---

    /// Persist one round of results atomically. Returns the number of rows.
    pub fn append_round(&self, results: &[ProbeResult]) -> Result<usize, DbError> {
        if results.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO probe_results (target_id, timestamp, status_code, response_time_ms, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for r in results {
                stmt.execute(params![
                    r.target_id,
                    format_db_time(r.timestamp),
                    r.status_code,
                    r.response_time_ms,
                    r.error_message,
                ])?;
            }
        }

        tx.commit()?;
        Ok(results.len())
    }

    /// Results from the trailing `hours`, newest first, joined with their target.
    pub fn query_window(&self, hours: u32) -> Result<Vec<AnnotatedResult>, DbError> {
        self.query_since(cutoff(ChronoDuration::hours(i64::from(hours))))
    }

    /// Results with `timestamp >= cutoff`, newest first.
    pub fn query_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AnnotatedResult>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT pr.id, pr.target_id, pr.timestamp, pr.status_code, pr.response_time_ms,
                    pr.error_message, t.url, t.group_name, t.country_code
             FROM probe_results pr
             JOIN targets t ON pr.target_id = t.id
             WHERE pr.timestamp >= ?1
             ORDER BY pr.timestamp DESC, pr.id DESC",
        )?;

        let rows = stmt
            .query_map(params![format_db_time(cutoff)], |row| {
                let time_str: String = row.get(2)?;
                let timestamp = parse_db_time(&time_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        Type::Text,
                        format!("invalid timestamp '{}'", time_str).into(),
                    )
                })?;
                let status_code: Option<u16> = row.get(3)?;
                Ok(AnnotatedResult {
                    result: ProbeResult {
                        id: row.get(0)?,
                        target_id: row.get(1)?,
                        timestamp,
                        status_code,
                        response_time_ms: row.get(4)?,
                        error_message: row.get(5)?,
                        success: is_success_status(status_code),
                    },
                    url: row.get(6)?,
                    group: row.get(7)?,
                    country_code: row.get(8)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(rows)
    }

    /// Total number of stored probe results.
    pub fn count_results(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM probe_results", [], |r| r.get(0))?)
    }

    // --- Maintenance ---

    /// Delete results older than `cutoff`. Targets are kept.
    pub fn delete_results_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM probe_results WHERE timestamp < ?1",
            params![format_db_time(cutoff)],
        )?;
        Ok(deleted)
    }

    /// Delete every result. Targets are kept.
    pub fn clear_results(&self) -> Result<usize, DbError> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM probe_results", [])?)
    }
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    Ok(Target {
        id: row.get(0)?,
        url: row.get(1)?,
        group: row.get(2)?,
        country_code: row.get(3)?,
    })
}

/// `now - span`, or the earliest representable instant when that underflows.
pub fn cutoff(span: ChronoDuration) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(span)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
