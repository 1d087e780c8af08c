use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use marketflow::aggregation::Aggregator;
use marketflow::cache::MemoryCache;
use marketflow::interfaces::{Cache, Storage};
use marketflow::pipeline::{Pipeline, PipelineCounters};
use marketflow::storage::SqliteStorage;
use marketflow::types::market::PriceUpdate;
use marketflow::utils::helper::current_timestamp_ms;

fn update(symbol: &str, exchange: &str, price: f64, received_at: u64) -> PriceUpdate {
    PriceUpdate {
        symbol: symbol.to_string(),
        price,
        timestamp: received_at,
        exchange: exchange.to_string(),
        received_at,
    }
}

/// Poll the cache until the latest price for the pair matches, or panic
/// after two seconds.
async fn wait_for_latest(cache: &MemoryCache, exchange: &str, symbol: &str, price: f64) {
    timeout(Duration::from_secs(2), async {
        loop {
            if let Some(latest) = cache.get_latest(exchange, symbol).await.unwrap() {
                if latest.price == price {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{exchange}:{symbol} never reached {price}"));
}

/// Poll until the pair's history holds `count` entries; the sink appends
/// history after the latest write, so this is the stronger condition.
async fn wait_for_history(cache: &MemoryCache, exchange: &str, symbol: &str, count: usize) {
    timeout(Duration::from_secs(2), async {
        loop {
            let history = cache
                .history_range(exchange, symbol, 0, u64::MAX)
                .await
                .unwrap();
            if history.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{exchange}:{symbol} history never reached {count}"));
}

#[tokio::test]
async fn updates_flow_into_latest_and_history() {
    let cache = Arc::new(MemoryCache::new());
    let (tx, rx) = mpsc::channel(100);
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(
        vec![rx],
        cache.clone(),
        Arc::new(PipelineCounters::default()),
        cancel.clone(),
    );

    let now = current_timestamp_ms();
    tx.send(update("BTCUSDT", "exchange1", 100.0, now - 500))
        .await
        .unwrap();
    wait_for_latest(&cache, "exchange1", "BTCUSDT", 100.0).await;

    tx.send(update("BTCUSDT", "exchange1", 102.0, now - 200))
        .await
        .unwrap();
    wait_for_latest(&cache, "exchange1", "BTCUSDT", 102.0).await;
    wait_for_history(&cache, "exchange1", "BTCUSDT", 2).await;

    let latest = cache
        .get_latest("exchange1", "BTCUSDT")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.symbol, "BTCUSDT");
    assert_eq!(latest.exchange, "exchange1");
    assert_eq!(latest.timestamp, now - 200);

    drop(tx);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn full_minute_scenario_produces_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MemoryCache::new());
    let storage = Arc::new(SqliteStorage::open_path(&dir.path().join("e2e.db")).unwrap());

    let (tx, rx) = mpsc::channel(100);
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(
        vec![rx],
        cache.clone(),
        Arc::new(PipelineCounters::default()),
        cancel.clone(),
    );

    let now = current_timestamp_ms();
    tx.send(update("BTCUSDT", "exchange1", 100.0, now - 500))
        .await
        .unwrap();
    wait_for_latest(&cache, "exchange1", "BTCUSDT", 100.0).await;
    tx.send(update("BTCUSDT", "exchange1", 102.0, now - 200))
        .await
        .unwrap();
    wait_for_history(&cache, "exchange1", "BTCUSDT", 2).await;

    let aggregator = Aggregator::new(cache.clone(), storage.clone(), Duration::from_secs(60));
    assert_eq!(aggregator.aggregate_once().await.unwrap(), 1);

    let row = storage
        .highest("BTCUSDT", Some("exchange1"), Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.average_price, 101.0);
    assert_eq!(row.min_price, 100.0);
    assert_eq!(row.max_price, 102.0);

    drop(tx);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn fifteen_pairs_aggregate_in_one_tick() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MemoryCache::new());
    let storage = Arc::new(SqliteStorage::open_path(&dir.path().join("pairs.db")).unwrap());

    let symbols = ["BTCUSDT", "DOGEUSDT", "TONUSDT", "SOLUSDT", "ETHUSDT"];
    let exchanges = ["exchange1", "exchange2", "exchange3"];
    let now = current_timestamp_ms();
    for symbol in symbols {
        for exchange in exchanges {
            for i in 0..40u64 {
                cache
                    .append_history(&update(symbol, exchange, 50.0 + i as f64, now - i * 100))
                    .await
                    .unwrap();
            }
        }
    }

    let aggregator = Aggregator::new(cache, storage.clone(), Duration::from_secs(60));
    assert_eq!(aggregator.aggregate_once().await.unwrap(), 15);

    // Cross-exchange average for one symbol combines the three rows.
    let combined = storage
        .average("BTCUSDT", None, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(combined.min_price, 50.0);
    assert_eq!(combined.max_price, 89.0);
}

#[tokio::test]
async fn unsupported_symbol_never_reaches_the_cache() {
    let cache = Arc::new(MemoryCache::new());
    let (tx, rx) = mpsc::channel(100);
    let cancel = CancellationToken::new();
    let counters = Arc::new(PipelineCounters::default());
    let pipeline = Pipeline::start(vec![rx], cache.clone(), counters.clone(), cancel.clone());

    let now = current_timestamp_ms();
    tx.send(update("XYZ", "exchange1", 1.0, now)).await.unwrap();
    tx.send(update("ETHUSDT", "exchange1", 3000.0, now))
        .await
        .unwrap();
    wait_for_latest(&cache, "exchange1", "ETHUSDT", 3000.0).await;

    assert!(cache
        .get_latest("exchange1", "XYZ")
        .await
        .unwrap()
        .is_none());
    // The rejecting worker runs concurrently with the one that forwarded
    // ETHUSDT; give it a moment to record the drop.
    timeout(Duration::from_secs(2), async {
        while counters.rejected.load(std::sync::atomic::Ordering::Relaxed) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("rejection was never counted");

    drop(tx);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn duplicate_update_is_idempotent_for_latest_but_not_history() {
    let cache = Arc::new(MemoryCache::new());
    let (tx, rx) = mpsc::channel(100);
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(
        vec![rx],
        cache.clone(),
        Arc::new(PipelineCounters::default()),
        cancel.clone(),
    );

    let now = current_timestamp_ms();
    let record = update("SOLUSDT", "exchange2", 210.0, now - 100);
    tx.send(record.clone()).await.unwrap();
    wait_for_latest(&cache, "exchange2", "SOLUSDT", 210.0).await;
    let first = cache
        .get_latest("exchange2", "SOLUSDT")
        .await
        .unwrap()
        .unwrap();

    tx.send(record.clone()).await.unwrap();
    // Wait for the duplicate to land before tearing down; shutdown is
    // urgent and may drop in-flight records.
    timeout(Duration::from_secs(2), async {
        loop {
            let history = cache
                .history_range("exchange2", "SOLUSDT", 0, u64::MAX)
                .await
                .unwrap();
            if history.len() == 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("duplicate never reached the cache");

    let second = cache
        .get_latest("exchange2", "SOLUSDT")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, second);

    drop(tx);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn multiple_inputs_fan_into_one_cache() {
    let cache = Arc::new(MemoryCache::new());
    let (tx1, rx1) = mpsc::channel(100);
    let (tx2, rx2) = mpsc::channel(100);
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(
        vec![rx1, rx2],
        cache.clone(),
        Arc::new(PipelineCounters::default()),
        cancel.clone(),
    );

    let now = current_timestamp_ms();
    tx1.send(update("BTCUSDT", "exchange1", 99_000.0, now))
        .await
        .unwrap();
    tx2.send(update("BTCUSDT", "exchange2", 99_100.0, now))
        .await
        .unwrap();

    wait_for_latest(&cache, "exchange1", "BTCUSDT", 99_000.0).await;
    wait_for_latest(&cache, "exchange2", "BTCUSDT", 99_100.0).await;

    let all = cache.get_latest_all("BTCUSDT").await.unwrap();
    assert_eq!(all.len(), 2);

    drop(tx1);
    drop(tx2);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_prompt_and_clean() {
    let cache = Arc::new(MemoryCache::new());
    let (tx, rx) = mpsc::channel(100);
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(
        vec![rx],
        cache,
        Arc::new(PipelineCounters::default()),
        cancel.clone(),
    );

    // Shut down while the producer is still alive: cancellation, not
    // channel closure, unwinds the stages.
    timeout(Duration::from_secs(5), pipeline.shutdown())
        .await
        .expect("shutdown exceeded its bound");
    drop(tx);
}
