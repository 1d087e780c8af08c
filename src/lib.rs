use std::time::Duration;

pub mod aggregation;
pub mod api;
pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod ingest;
pub mod interfaces;
pub mod observability;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod types;
pub mod utils;

/// Sliding window over which per-minute aggregates are computed.
pub const AGGREGATION_WINDOW: Duration = Duration::from_secs(60);

/// Latest-price cache entries live twice the aggregation window.
pub const LATEST_PRICE_TTL: Duration = Duration::from_secs(120);

/// Durable aggregates older than this are pruned by the hourly cleanup tick.
pub const STORAGE_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);
