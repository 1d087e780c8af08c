use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::interfaces::Cache;
use crate::types::market::{LatestPrice, PriceUpdate};
use crate::utils::helper::current_timestamp_ms;
use crate::LATEST_PRICE_TTL;

type PairKey = (String, String); // (exchange, symbol)

#[derive(Default)]
struct Inner {
    /// Latest entry plus its expiry deadline in wall-clock milliseconds.
    latest: HashMap<PairKey, (LatestPrice, u64)>,
    /// History ordered by `received_at`; duplicates at the same millisecond
    /// are kept side by side.
    history: HashMap<PairKey, BTreeMap<u64, Vec<PriceUpdate>>>,
}

/// In-process cache with the same contract as the Redis adapter.
///
/// Backs the test suites and serves as the degraded-startup fallback when
/// the cache server is unreachable.
#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_latest(&self, update: &PriceUpdate) -> Result<()> {
        let mut inner = self.inner.write().await;
        let expires_at = current_timestamp_ms() + LATEST_PRICE_TTL.as_millis() as u64;
        inner.latest.insert(
            (update.exchange.clone(), update.symbol.clone()),
            (LatestPrice::from_update(update), expires_at),
        );
        Ok(())
    }

    async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<Option<LatestPrice>> {
        let inner = self.inner.read().await;
        let now = current_timestamp_ms();
        Ok(inner
            .latest
            .get(&(exchange.to_string(), symbol.to_string()))
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(price, _)| price.clone()))
    }

    async fn get_latest_all(&self, symbol: &str) -> Result<Vec<LatestPrice>> {
        let inner = self.inner.read().await;
        let now = current_timestamp_ms();
        Ok(inner
            .latest
            .iter()
            .filter(|((_, s), (_, expires_at))| s.as_str() == symbol && *expires_at > now)
            .map(|(_, (price, _))| price.clone())
            .collect())
    }

    async fn append_history(&self, update: &PriceUpdate) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .history
            .entry((update.exchange.clone(), update.symbol.clone()))
            .or_default()
            .entry(update.received_at)
            .or_default()
            .push(update.clone());
        Ok(())
    }

    async fn history_range(
        &self,
        exchange: &str,
        symbol: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<PriceUpdate>> {
        let inner = self.inner.read().await;
        let Some(history) = inner
            .history
            .get(&(exchange.to_string(), symbol.to_string()))
        else {
            return Ok(Vec::new());
        };
        Ok(history
            .range(from_ms..=to_ms)
            .flat_map(|(_, updates)| updates.iter().cloned())
            .collect())
    }

    async fn trim_history(&self, exchange: &str, symbol: &str, older_than_ms: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(history) = inner
            .history
            .get_mut(&(exchange.to_string(), symbol.to_string()))
        {
            *history = history.split_off(&older_than_ms);
        }
        Ok(())
    }

    async fn known_pairs(&self) -> Result<Vec<(String, String)>> {
        let inner = self.inner.read().await;
        Ok(inner.history.keys().cloned().collect())
    }

    async fn cleanup(&self, max_age: Duration) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = current_timestamp_ms();
        inner.latest.retain(|_, (_, expires_at)| *expires_at > now);
        let cutoff = now.saturating_sub(max_age.as_millis() as u64);
        for history in inner.history.values_mut() {
            *history = history.split_off(&cutoff);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(symbol: &str, exchange: &str, price: f64, received_at: u64) -> PriceUpdate {
        PriceUpdate {
            symbol: symbol.to_string(),
            price,
            timestamp: received_at,
            exchange: exchange.to_string(),
            received_at,
        }
    }

    #[tokio::test]
    async fn latest_is_overwritten_per_pair() {
        let cache = MemoryCache::new();
        let now = current_timestamp_ms();
        cache
            .set_latest(&update("BTCUSDT", "exchange1", 100.0, now - 500))
            .await
            .unwrap();
        cache
            .set_latest(&update("BTCUSDT", "exchange1", 102.0, now - 200))
            .await
            .unwrap();

        let latest = cache.get_latest("exchange1", "BTCUSDT").await.unwrap();
        assert_eq!(latest.unwrap().price, 102.0);
    }

    #[tokio::test]
    async fn latest_all_spans_exchanges() {
        let cache = MemoryCache::new();
        let now = current_timestamp_ms();
        cache
            .set_latest(&update("ETHUSDT", "exchange1", 3000.0, now))
            .await
            .unwrap();
        cache
            .set_latest(&update("ETHUSDT", "exchange2", 3001.0, now))
            .await
            .unwrap();
        cache
            .set_latest(&update("BTCUSDT", "exchange1", 99_000.0, now))
            .await
            .unwrap();

        let all = cache.get_latest_all("ETHUSDT").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn history_range_is_inclusive_and_keeps_duplicates() {
        let cache = MemoryCache::new();
        for (price, at) in [(1.0, 1000), (2.0, 2000), (2.5, 2000), (3.0, 3000)] {
            cache
                .append_history(&update("TONUSDT", "exchange1", price, at))
                .await
                .unwrap();
        }

        let range = cache
            .history_range("exchange1", "TONUSDT", 1000, 2000)
            .await
            .unwrap();
        assert_eq!(range.len(), 3);
    }

    #[tokio::test]
    async fn trim_drops_everything_below_cutoff() {
        let cache = MemoryCache::new();
        for at in [1000, 2000, 3000] {
            cache
                .append_history(&update("SOLUSDT", "exchange1", 200.0, at))
                .await
                .unwrap();
        }
        cache
            .trim_history("exchange1", "SOLUSDT", 2000)
            .await
            .unwrap();

        let remaining = cache
            .history_range("exchange1", "SOLUSDT", 0, u64::MAX)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|u| u.received_at >= 2000));
    }

    #[tokio::test]
    async fn known_pairs_reflect_history_keys() {
        let cache = MemoryCache::new();
        let now = current_timestamp_ms();
        cache
            .append_history(&update("BTCUSDT", "exchange1", 100.0, now))
            .await
            .unwrap();
        cache
            .append_history(&update("ETHUSDT", "exchange2", 3000.0, now))
            .await
            .unwrap();

        let mut pairs = cache.known_pairs().await.unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("exchange1".to_string(), "BTCUSDT".to_string()),
                ("exchange2".to_string(), "ETHUSDT".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn cleanup_trims_old_history() {
        let cache = MemoryCache::new();
        let now = current_timestamp_ms();
        cache
            .append_history(&update("BTCUSDT", "exchange1", 100.0, now - 300_000))
            .await
            .unwrap();
        cache
            .append_history(&update("BTCUSDT", "exchange1", 101.0, now))
            .await
            .unwrap();

        cache.cleanup(Duration::from_secs(120)).await.unwrap();

        let remaining = cache
            .history_range("exchange1", "BTCUSDT", 0, u64::MAX)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].price, 101.0);
    }
}
