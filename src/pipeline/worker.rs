use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::observability::metrics;
use crate::pipeline::{PipelineCounters, WORKER_SEND_BUDGET};
use crate::types::market::{PriceUpdate, PRICE_SANITY_MAX, PRICE_SANITY_MIN};

/// One pool worker: validate, enrich, forward.
///
/// Workers keep no state beyond the shared counters. They never close the
/// result channel explicitly; the last worker to return drops the last
/// sender.
pub async fn run(
    id: usize,
    mut inbox: mpsc::Receiver<PriceUpdate>,
    result: mpsc::Sender<PriceUpdate>,
    counters: Arc<PipelineCounters>,
    cancel: CancellationToken,
) {
    debug!(worker = id, "worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = inbox.recv() => {
                let Some(mut update) = item else {
                    debug!(worker = id, "inbox closed");
                    break;
                };
                if let Err(e) = process(&mut update) {
                    counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(worker = id, error = %e, "dropping invalid record");
                    continue;
                }
                match timeout(WORKER_SEND_BUDGET, result.send(update)).await {
                    Ok(Ok(())) => {
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                        metrics::RECORDS_PROCESSED.inc();
                    }
                    // Sink gone: shutting down.
                    Ok(Err(_)) => break,
                    Err(_) => {
                        let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        metrics::record_backpressure_drop("worker");
                        if dropped % 100 == 0 {
                            warn!(worker = id, dropped, "result channel full, dropping");
                        }
                    }
                }
            }
        }
    }
    debug!(worker = id, "worker stopped");
}

fn process(update: &mut PriceUpdate) -> crate::error::Result<()> {
    update.validate().inspect_err(|_| {
        metrics::record_rejected(if update.price <= 0.0 {
            "bad_price"
        } else {
            "unsupported_symbol"
        });
    })?;

    if update.timestamp == 0 {
        update.timestamp = update.received_at;
    }

    if !(PRICE_SANITY_MIN..=PRICE_SANITY_MAX).contains(&update.price) {
        warn!(
            symbol = %update.symbol,
            exchange = %update.exchange,
            price = update.price,
            "price outside expected range"
        );
    }
    Ok(())
}
