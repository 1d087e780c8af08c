use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::interfaces::{Cache, Storage};
use crate::observability::metrics;
use crate::types::market::AggregatedRow;
use crate::utils::helper::current_timestamp_ms;

const TICK: Duration = Duration::from_secs(60);

/// Rolls the sliding window of cached history into durable minute rows.
///
/// Windows are aligned to the tick's wall clock, not to record time: a
/// missed tick drops a minute instead of producing overlapping windows
/// (hence `MissedTickBehavior::Skip`).
pub struct Aggregator {
    cache: Arc<dyn Cache>,
    storage: Arc<dyn Storage>,
    window: Duration,
}

impl Aggregator {
    pub fn new(cache: Arc<dyn Cache>, storage: Arc<dyn Storage>, window: Duration) -> Self {
        Aggregator {
            cache,
            storage,
            window,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("aggregation ticker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("aggregation ticker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.aggregate_once().await {
                        Ok(rows) => debug!(rows, "aggregation tick complete"),
                        Err(e) => {
                            metrics::TICKS_ABANDONED.inc();
                            error!(error = %e, "aggregation tick abandoned");
                        }
                    }
                }
            }
        }
    }

    /// One tick: read the window for every known (exchange, symbol) pair,
    /// skip empty ones, write all resulting rows in a single transaction.
    /// A storage failure abandons the whole tick; the next tick recomputes
    /// independently.
    pub async fn aggregate_once(&self) -> Result<usize> {
        let window_end = current_timestamp_ms();
        let window_start = window_end.saturating_sub(self.window.as_millis() as u64);

        let mut rows = Vec::new();
        for (exchange, symbol) in self.cache.known_pairs().await? {
            let history = match self
                .cache
                .history_range(&exchange, &symbol, window_start, window_end)
                .await
            {
                Ok(history) => history,
                Err(e) => {
                    warn!(exchange = %exchange, symbol = %symbol, error = %e, "history read failed");
                    continue;
                }
            };
            if history.is_empty() {
                continue;
            }

            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            let mut sum = 0.0;
            for update in &history {
                sum += update.price;
                min = min.min(update.price);
                max = max.max(update.price);
            }

            rows.push(AggregatedRow {
                id: 0,
                pair_name: symbol,
                exchange,
                timestamp: window_end,
                average_price: sum / history.len() as f64,
                min_price: min,
                max_price: max,
            });
        }

        if rows.is_empty() {
            return Ok(0);
        }

        let count = rows.len();
        self.storage.save_aggregates(&rows).await?;
        metrics::ROWS_AGGREGATED.inc_by(count as u64);
        info!(rows = count, "aggregated window persisted");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::storage::SqliteStorage;
    use crate::types::market::PriceUpdate;

    fn update(symbol: &str, exchange: &str, price: f64, received_at: u64) -> PriceUpdate {
        PriceUpdate {
            symbol: symbol.to_string(),
            price,
            timestamp: received_at,
            exchange: exchange.to_string(),
            received_at,
        }
    }

    async fn fixture() -> (Arc<MemoryCache>, Arc<SqliteStorage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SqliteStorage::open_path(&dir.path().join("agg.db")).unwrap());
        (Arc::new(MemoryCache::new()), storage, dir)
    }

    #[tokio::test]
    async fn rolls_the_window_into_one_row_per_pair() {
        let (cache, storage, _dir) = fixture().await;
        let now = current_timestamp_ms();
        cache
            .append_history(&update("BTCUSDT", "exchange1", 100.0, now - 500))
            .await
            .unwrap();
        cache
            .append_history(&update("BTCUSDT", "exchange1", 102.0, now - 200))
            .await
            .unwrap();

        let aggregator = Aggregator::new(
            cache.clone(),
            storage.clone(),
            Duration::from_secs(60),
        );
        assert_eq!(aggregator.aggregate_once().await.unwrap(), 1);

        let row = storage
            .highest("BTCUSDT", Some("exchange1"), Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.average_price, 101.0);
        assert_eq!(row.min_price, 100.0);
        assert_eq!(row.max_price, 102.0);
        assert!(row.min_price <= row.average_price && row.average_price <= row.max_price);
    }

    #[tokio::test]
    async fn one_row_per_pair_across_exchanges_and_symbols() {
        let (cache, storage, _dir) = fixture().await;
        let now = current_timestamp_ms();
        let symbols = ["BTCUSDT", "DOGEUSDT", "TONUSDT", "SOLUSDT", "ETHUSDT"];
        let exchanges = ["exchange1", "exchange2", "exchange3"];
        for symbol in symbols {
            for exchange in exchanges {
                for i in 0..3 {
                    cache
                        .append_history(&update(symbol, exchange, 10.0 + i as f64, now - 100 * i as u64))
                        .await
                        .unwrap();
                }
            }
        }

        let aggregator = Aggregator::new(cache, storage, Duration::from_secs(60));
        assert_eq!(aggregator.aggregate_once().await.unwrap(), 15);
    }

    #[tokio::test]
    async fn empty_window_writes_nothing() {
        let (cache, storage, _dir) = fixture().await;
        let now = current_timestamp_ms();
        // Only stale history, outside the window.
        cache
            .append_history(&update("BTCUSDT", "exchange1", 100.0, now - 120_000))
            .await
            .unwrap();

        let aggregator = Aggregator::new(cache, storage.clone(), Duration::from_secs(60));
        assert_eq!(aggregator.aggregate_once().await.unwrap(), 0);
        assert!(storage
            .highest("BTCUSDT", None, Duration::from_secs(3600))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_updates_keep_min_max_and_count_twice() {
        let (cache, storage, _dir) = fixture().await;
        let now = current_timestamp_ms();
        let u = update("ETHUSDT", "exchange1", 3000.0, now - 100);
        cache.append_history(&u).await.unwrap();
        cache.append_history(&u).await.unwrap();

        let aggregator = Aggregator::new(cache, storage.clone(), Duration::from_secs(60));
        aggregator.aggregate_once().await.unwrap();

        let row = storage
            .average("ETHUSDT", Some("exchange1"), Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.min_price, 3000.0);
        assert_eq!(row.max_price, 3000.0);
        assert_eq!(row.average_price, 3000.0);
    }
}
