use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::interfaces::{Cache, Storage};
use crate::{LATEST_PRICE_TTL, STORAGE_RETENTION};

const CACHE_SWEEP: Duration = Duration::from_secs(30);
const STORAGE_SWEEP: Duration = Duration::from_secs(3600);

/// Periodic housekeeping: every 30 s trim cache data older than twice the
/// aggregation window, every hour prune aggregates past retention.
pub struct CleanupTicker {
    cache: Arc<dyn Cache>,
    storage: Arc<dyn Storage>,
}

impl CleanupTicker {
    pub fn new(cache: Arc<dyn Cache>, storage: Arc<dyn Storage>) -> Self {
        CleanupTicker { cache, storage }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut cache_tick = interval_at(Instant::now() + CACHE_SWEEP, CACHE_SWEEP);
        cache_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut storage_tick = interval_at(Instant::now() + STORAGE_SWEEP, STORAGE_SWEEP);
        storage_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("cleanup ticker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cleanup ticker stopped");
                    return;
                }
                _ = cache_tick.tick() => {
                    if let Err(e) = self.cache.cleanup(LATEST_PRICE_TTL).await {
                        warn!(error = %e, "cache cleanup failed");
                    }
                }
                _ = storage_tick.tick() => {
                    match self.storage.prune_older_than(STORAGE_RETENTION).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "pruned expired aggregates"),
                        Err(e) => warn!(error = %e, "storage retention prune failed"),
                    }
                }
            }
        }
    }
}
