use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::interfaces::Storage;
use crate::types::market::AggregatedRow;
use crate::utils::helper::current_timestamp_ms;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS market_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pair_name TEXT NOT NULL,
    exchange TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    average_price REAL NOT NULL,
    min_price REAL NOT NULL,
    max_price REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_market_data_pair_exchange_ts
    ON market_data (pair_name, exchange, timestamp DESC);
";

const ROW_COLUMNS: &str = "id, pair_name, exchange, timestamp, average_price, min_price, max_price";

fn storage_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Storage(e.to_string())
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<AggregatedRow> {
    Ok(AggregatedRow {
        id: row.get(0)?,
        pair_name: row.get(1)?,
        exchange: row.get(2)?,
        timestamp: row.get::<_, i64>(3)? as u64,
        average_price: row.get(4)?,
        min_price: row.get(5)?,
        max_price: row.get(6)?,
    })
}

/// Embedded SQL storage for minute aggregates.
///
/// `database.name` from the configuration is the database file path; the
/// schema is created on open and opening is idempotent.
pub struct SqliteStorage {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStorage {
    pub fn open(cfg: &DatabaseConfig) -> Result<Self> {
        Self::open_path(Path::new(&cfg.name))
    }

    pub fn open_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(storage_err)?;

        let conn = pool.get().map_err(storage_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;

        Ok(SqliteStorage { pool })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_aggregates(&self, rows: &[AggregatedRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let pool = self.pool.clone();
        let rows = rows.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(storage_err)?;
            let tx = conn.transaction().map_err(storage_err)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO market_data \
                         (pair_name, exchange, timestamp, average_price, min_price, max_price) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .map_err(storage_err)?;
                for row in &rows {
                    stmt.execute(params![
                        row.pair_name,
                        row.exchange,
                        row.timestamp as i64,
                        row.average_price,
                        row.min_price,
                        row.max_price,
                    ])
                    .map_err(storage_err)?;
                }
            }
            tx.commit().map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }

    async fn highest(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<Option<AggregatedRow>> {
        self.query_extreme(symbol, exchange, period, "max_price DESC")
            .await
    }

    async fn lowest(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<Option<AggregatedRow>> {
        self.query_extreme(symbol, exchange, period, "min_price ASC")
            .await
    }

    async fn average(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
    ) -> Result<Option<AggregatedRow>> {
        let pool = self.pool.clone();
        let symbol = symbol.to_string();
        let exchange = exchange.map(str::to_string);
        let from = window_start(period);
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(storage_err)?;
            let (avg, min, max): (Option<f64>, Option<f64>, Option<f64>) = conn
                .query_row(
                    "SELECT AVG(average_price), MIN(min_price), MAX(max_price) \
                     FROM market_data \
                     WHERE pair_name = ?1 AND (?2 IS NULL OR exchange = ?2) \
                       AND timestamp >= ?3",
                    params![symbol, exchange, from],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(storage_err)?;

            let (Some(avg), Some(min), Some(max)) = (avg, min, max) else {
                return Ok(None);
            };
            Ok(Some(AggregatedRow {
                id: 0,
                pair_name: symbol,
                exchange: exchange.unwrap_or_default(),
                timestamp: current_timestamp_ms(),
                average_price: avg,
                min_price: min,
                max_price: max,
            }))
        })
        .await
        .map_err(storage_err)?
    }

    async fn prune_older_than(&self, retention: Duration) -> Result<u64> {
        let pool = self.pool.clone();
        let cutoff = window_start(retention);
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(storage_err)?;
            let removed = conn
                .execute("DELETE FROM market_data WHERE timestamp < ?1", params![cutoff])
                .map_err(storage_err)?;
            Ok(removed as u64)
        })
        .await
        .map_err(storage_err)?
    }

    async fn ping(&self) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(storage_err)?;
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }
}

impl SqliteStorage {
    async fn query_extreme(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        period: Duration,
        order_by: &'static str,
    ) -> Result<Option<AggregatedRow>> {
        let pool = self.pool.clone();
        let symbol = symbol.to_string();
        let exchange = exchange.map(str::to_string);
        let from = window_start(period);
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(storage_err)?;
            let sql = format!(
                "SELECT {ROW_COLUMNS} FROM market_data \
                 WHERE pair_name = ?1 AND (?2 IS NULL OR exchange = ?2) \
                   AND timestamp >= ?3 \
                 ORDER BY {order_by} LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let mut rows = stmt
                .query_map(params![symbol, exchange, from], row_from_sql)
                .map_err(storage_err)?;
            match rows.next() {
                Some(row) => Ok(Some(row.map_err(storage_err)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(storage_err)?
    }
}

fn window_start(period: Duration) -> i64 {
    current_timestamp_ms().saturating_sub(period.as_millis() as u64) as i64
}
