use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::market::AggregatedRow;

/// Contract for durable minute-aggregate storage (`market_data` table).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist all rows of one aggregation tick in a single transaction.
    /// Either every row lands or none does.
    async fn save_aggregates(&self, rows: &[AggregatedRow]) -> Result<()>;

    /// Row with the greatest `max_price` in `[now - period, now]`.
    /// `exchange = None` searches across all exchanges.
    async fn highest(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<Option<AggregatedRow>>;

    /// Row with the smallest `min_price` in `[now - period, now]`.
    async fn lowest(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<Option<AggregatedRow>>;

    /// Aggregate of `average_price` (with overall min/max) across the rows in
    /// `[now - period, now]`; `None` when the window is empty.
    async fn average(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<Option<AggregatedRow>>;

    /// Delete rows older than `retention`; returns the number removed.
    async fn prune_older_than(&self, retention: Duration) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}
