//! Retention manager for cleaning up old probe results.
//!
//! Only runs when a retention horizon is configured; targets are never
//! touched.

use crate::db::{self, Store};

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Manager for deleting results past the retention horizon.
pub struct RetentionManager {
    store: Arc<Store>,
    horizon: ChronoDuration,
    period: Duration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention_days: u32) -> Self {
        Self {
            store,
            horizon: ChronoDuration::days(i64::from(retention_days)),
            period: Duration::from_secs(3600),
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub async fn start(&self) {
        let (tx, mut rx) = tokio::sync::broadcast::channel(1);
        {
            let mut stop_guard = self.stop.lock().await;
            if let Some(old) = stop_guard.replace(tx) {
                let _ = old.send(());
            }
        }

        let store = self.store.clone();
        let horizon = self.horizon;
        let mut interval = tokio::time::interval(self.period);

        tracing::info!("RetentionManager: keeping {} days of results", horizon.num_days());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&store, horizon);
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

/// Delete results older than `horizon`. Returns the number of deleted rows.
pub fn process_retention(store: &Store, horizon: ChronoDuration) -> usize {
    let cutoff = db::cutoff(horizon);
    match store.delete_results_before(cutoff) {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!("RetentionManager: deleted {} results before {}", deleted, cutoff);
            }
            deleted
        }
        Err(e) => {
            tracing::error!("RetentionManager: failed to delete old results: {}", e);
            0
        }
    }
}
