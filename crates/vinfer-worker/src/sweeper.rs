//! Background cache expiry.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use vinfer_storage::CacheStore;

use crate::error::WorkerResult;
use crate::metrics;

/// Periodically evicts expired and failed cache entries.
pub struct CacheSweeper {
    store: CacheStore,
    interval: Duration,
}

impl CacheSweeper {
    pub fn new(store: CacheStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until `shutdown` flips to true.
    ///
    /// Spawn this as a background task.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting cache sweeper (interval: {:?})", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Cache sweep error: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Cache sweeper stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Run a single sweep. Returns the number of evicted entries.
    pub async fn sweep_once(&self) -> WorkerResult<usize> {
        let evicted = self.store.sweep_expired(Utc::now()).await?;
        if evicted > 0 {
            metrics::record_evictions(evicted);
        }
        Ok(evicted)
    }
}
