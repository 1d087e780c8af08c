use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::interfaces::Cache;
use crate::observability::metrics;
use crate::types::market::PriceUpdate;
use crate::utils::helper::current_timestamp_ms;
use crate::AGGREGATION_WINDOW;

/// Single consumer of the result channel: write the latest-price entry,
/// append to history, opportunistically trim.
///
/// Cache failures are counted and logged but never propagate; the pipeline
/// must survive a dead cache and pick up where it left off once the cache
/// returns.
pub async fn run(
    mut results: mpsc::Receiver<PriceUpdate>,
    cache: Arc<dyn Cache>,
    cancel: CancellationToken,
) {
    let mut failures = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = results.recv() => {
                let Some(update) = item else {
                    info!("result channel closed");
                    break;
                };
                write(&cache, &update, &mut failures).await;
            }
        }
    }
}

async fn write(cache: &Arc<dyn Cache>, update: &PriceUpdate, failures: &mut u64) {
    if let Err(e) = cache.set_latest(update).await {
        note_failure(failures, &e);
    }
    if let Err(e) = cache.append_history(update).await {
        note_failure(failures, &e);
    }

    let cutoff = current_timestamp_ms().saturating_sub(AGGREGATION_WINDOW.as_millis() as u64);
    if let Err(e) = cache
        .trim_history(&update.exchange, &update.symbol, cutoff)
        .await
    {
        note_failure(failures, &e);
    }
}

fn note_failure(failures: &mut u64, e: &crate::error::Error) {
    *failures += 1;
    metrics::CACHE_WRITE_FAILURES.inc();
    if *failures % 50 == 1 {
        error!(error = %e, failures, "cache write failed");
    }
}
