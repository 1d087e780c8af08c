use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::interfaces::Cache;
use crate::types::market::{LatestPrice, PriceUpdate};
use crate::utils::helper::current_timestamp_ms;
use crate::LATEST_PRICE_TTL;

fn latest_key(exchange: &str, symbol: &str) -> String {
    format!("latest:{}:{}", exchange, symbol)
}

fn history_key(exchange: &str, symbol: &str) -> String {
    format!("history:{}:{}", exchange, symbol)
}

/// Redis-backed cache adapter.
///
/// Uses a `ConnectionManager` so a cache outage surfaces as per-command
/// errors instead of a poisoned connection; the pipeline logs and keeps
/// going, and writes succeed again once the server is back.
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(cfg: &CacheConfig) -> Result<Self> {
        let client = redis::Client::open(cfg.url()).map_err(|e| Error::Connect {
            target: cfg.url(),
            reason: e.to_string(),
        })?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Connect {
                target: cfg.url(),
                reason: e.to_string(),
            })?;
        Ok(RedisCache { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set_latest(&self, update: &PriceUpdate) -> Result<()> {
        let mut conn = self.conn.clone();
        let latest = LatestPrice::from_update(update);
        let payload =
            serde_json::to_string(&latest).map_err(|e| Error::CacheWrite(e.to_string()))?;
        let _: () = conn
            .set_ex(
                latest_key(&update.exchange, &update.symbol),
                payload,
                LATEST_PRICE_TTL.as_secs(),
            )
            .await
            .map_err(|e| Error::CacheWrite(e.to_string()))?;
        Ok(())
    }

    async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<Option<LatestPrice>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(latest_key(exchange, symbol))
            .await
            .map_err(|e| Error::CacheRead(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| Error::CacheRead(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn get_latest_all(&self, symbol: &str) -> Result<Vec<LatestPrice>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("latest:*:{}", symbol))
            .await
            .map_err(|e| Error::CacheRead(e.to_string()))?;
        let mut prices = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| Error::CacheRead(e.to_string()))?;
            if let Some(raw) = raw {
                // Entries may expire between KEYS and GET; skip quietly.
                if let Ok(price) = serde_json::from_str::<LatestPrice>(&raw) {
                    prices.push(price);
                }
            }
        }
        Ok(prices)
    }

    async fn append_history(&self, update: &PriceUpdate) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload =
            serde_json::to_string(update).map_err(|e| Error::CacheWrite(e.to_string()))?;
        let _: () = conn
            .zadd(
                history_key(&update.exchange, &update.symbol),
                payload,
                update.received_at,
            )
            .await
            .map_err(|e| Error::CacheWrite(e.to_string()))?;
        Ok(())
    }

    async fn history_range(
        &self,
        exchange: &str,
        symbol: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<PriceUpdate>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrangebyscore(history_key(exchange, symbol), from_ms, to_ms)
            .await
            .map_err(|e| Error::CacheRead(e.to_string()))?;
        let mut updates = Vec::with_capacity(members.len());
        for member in members {
            if let Ok(update) = serde_json::from_str::<PriceUpdate>(&member) {
                updates.push(update);
            }
        }
        Ok(updates)
    }

    async fn trim_history(&self, exchange: &str, symbol: &str, older_than_ms: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zrembyscore(
                history_key(exchange, symbol),
                0,
                older_than_ms.saturating_sub(1),
            )
            .await
            .map_err(|e| Error::CacheWrite(e.to_string()))?;
        Ok(())
    }

    async fn known_pairs(&self) -> Result<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys("history:*")
            .await
            .map_err(|e| Error::CacheRead(e.to_string()))?;
        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            let mut parts = key.splitn(3, ':');
            let (_, exchange, symbol) = (parts.next(), parts.next(), parts.next());
            if let (Some(exchange), Some(symbol)) = (exchange, symbol) {
                pairs.push((exchange.to_string(), symbol.to_string()));
            }
        }
        Ok(pairs)
    }

    async fn cleanup(&self, max_age: Duration) -> Result<()> {
        let mut conn = self.conn.clone();

        // Latest entries: delete keys whose TTL was lost or exceeds the bound.
        let latest_keys: Vec<String> = conn
            .keys("latest:*")
            .await
            .map_err(|e| Error::CacheRead(e.to_string()))?;
        for key in latest_keys {
            let ttl: i64 = conn
                .ttl(&key)
                .await
                .map_err(|e| Error::CacheRead(e.to_string()))?;
            if ttl < 0 || ttl as u64 > max_age.as_secs() {
                let _: () = conn
                    .del(&key)
                    .await
                    .map_err(|e| Error::CacheWrite(e.to_string()))?;
            }
        }

        // History sets: drop everything older than the window.
        let cutoff = current_timestamp_ms().saturating_sub(max_age.as_millis() as u64);
        let history_keys: Vec<String> = conn
            .keys("history:*")
            .await
            .map_err(|e| Error::CacheRead(e.to_string()))?;
        for key in history_keys {
            let _: () = conn
                .zrembyscore(&key, 0, cutoff)
                .await
                .map_err(|e| Error::CacheWrite(e.to_string()))?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Error::CacheRead(e.to_string()))
    }
}
