use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Trading pairs the pipeline accepts; anything else is rejected at the worker.
pub const SUPPORTED_SYMBOLS: [&str; 5] =
    ["BTCUSDT", "DOGEUSDT", "TONUSDT", "SOLUSDT", "ETHUSDT"];

/// Sanity bounds for incoming prices. Records outside are forwarded with a warning.
pub const PRICE_SANITY_MIN: f64 = 1e-4;
pub const PRICE_SANITY_MAX: f64 = 1e6;

pub fn is_symbol_supported(symbol: &str) -> bool {
    SUPPORTED_SYMBOLS.contains(&symbol)
}

/// A single price observation from an upstream exchange.
///
/// On the wire only `symbol`, `price` and `timestamp` are present;
/// `exchange` and `received_at` are stamped by the adapter that read the
/// record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: f64,
    /// Milliseconds since epoch as reported upstream; 0 when absent.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub exchange: String,
    /// Server wall clock at ingest, milliseconds.
    #[serde(default)]
    pub received_at: u64,
}

impl PriceUpdate {
    pub fn validate(&self) -> Result<()> {
        if !is_symbol_supported(&self.symbol) {
            return Err(Error::Validate(format!(
                "unsupported symbol: {:?}",
                self.symbol
            )));
        }
        if self.price <= 0.0 {
            return Err(Error::Validate(format!(
                "non-positive price {} for {}",
                self.price, self.symbol
            )));
        }
        Ok(())
    }
}

/// Latest observation per (exchange, symbol), as cached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatestPrice {
    pub symbol: String,
    pub exchange: String,
    pub price: f64,
    /// Server wall clock of the underlying observation, milliseconds.
    pub timestamp: u64,
}

impl LatestPrice {
    pub fn from_update(update: &PriceUpdate) -> Self {
        LatestPrice {
            symbol: update.symbol.clone(),
            exchange: update.exchange.clone(),
            price: update.price,
            timestamp: update.received_at,
        }
    }
}

/// One minute of observations rolled into a durable row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    #[serde(default)]
    pub id: i64,
    pub pair_name: String,
    pub exchange: String,
    /// Window end, milliseconds since epoch.
    pub timestamp: u64,
    pub average_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}
