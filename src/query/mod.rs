pub mod period;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::interfaces::{Cache, Storage};
use crate::types::market::{AggregatedRow, LatestPrice};

/// Read side: latest prices from the cache, windowed extremes and averages
/// from storage.
pub struct QueryService {
    cache: Arc<dyn Cache>,
    storage: Arc<dyn Storage>,
}

impl QueryService {
    pub fn new(cache: Arc<dyn Cache>, storage: Arc<dyn Storage>) -> Self {
        QueryService { cache, storage }
    }

    /// Latest observation. Without an exchange, the newest entry across all
    /// exchanges wins.
    pub async fn latest(&self, symbol: &str, exchange: Option<&str>) -> Result<LatestPrice> {
        match exchange {
            Some(exchange) => self
                .cache
                .get_latest(exchange, symbol)
                .await?
                .ok_or(Error::NotFound),
            None => self
                .cache
                .get_latest_all(symbol)
                .await?
                .into_iter()
                .max_by_key(|price| price.timestamp)
                .ok_or(Error::NotFound),
        }
    }

    pub async fn highest(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<AggregatedRow> {
        self.storage
            .highest(symbol, exchange, period)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn lowest(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<AggregatedRow> {
        self.storage
            .lowest(symbol, exchange, period)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn average(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<AggregatedRow> {
        self.storage
            .average(symbol, exchange, period)
            .await?
            .ok_or(Error::NotFound)
    }
}
