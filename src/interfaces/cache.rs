use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::market::{LatestPrice, PriceUpdate};

/// Contract for the latest-price / history cache.
///
/// Layout: `latest:{exchange}:{symbol}` holds the newest observation with a
/// TTL of twice the aggregation window; `history:{exchange}:{symbol}` is a
/// set of serialized updates scored by `received_at` milliseconds.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Overwrite the latest-price entry for the update's (exchange, symbol).
    async fn set_latest(&self, update: &PriceUpdate) -> Result<()>;

    async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<Option<LatestPrice>>;

    /// Latest entries for a symbol across all exchanges.
    async fn get_latest_all(&self, symbol: &str) -> Result<Vec<LatestPrice>>;

    /// Append the update to its history set, scored by `received_at`.
    async fn append_history(&self, update: &PriceUpdate) -> Result<()>;

    /// History entries with score in `[from_ms, to_ms]`.
    async fn history_range(
        &self,
        exchange: &str,
        symbol: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<PriceUpdate>>;

    /// Drop history entries scored strictly below `older_than_ms`.
    async fn trim_history(&self, exchange: &str, symbol: &str, older_than_ms: u64) -> Result<()>;

    /// All (exchange, symbol) pairs that currently have history.
    async fn known_pairs(&self) -> Result<Vec<(String, String)>>;

    /// Periodic sweep: delete stale latest entries and history older than `max_age`.
    async fn cleanup(&self, max_age: Duration) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}
