use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::observability::metrics;
use crate::pipeline::{PipelineCounters, DISTRIBUTOR_SEND_BUDGET};
use crate::types::market::PriceUpdate;

/// Round-robin the aggregated stream across the worker inboxes.
///
/// A send that exceeds the budget drops the record and still advances the
/// cursor, so one slow worker cannot starve its neighbours. The inbox
/// senders are owned here; dropping them on return is what closes the
/// worker inboxes during shutdown.
pub async fn run(
    mut aggregated: mpsc::Receiver<PriceUpdate>,
    inboxes: Vec<mpsc::Sender<PriceUpdate>>,
    counters: Arc<PipelineCounters>,
    cancel: CancellationToken,
) {
    let mut cursor = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = aggregated.recv() => {
                let Some(update) = item else {
                    info!("aggregated channel closed");
                    break;
                };
                let target = cursor % inboxes.len();
                cursor = cursor.wrapping_add(1);
                match timeout(DISTRIBUTOR_SEND_BUDGET, inboxes[target].send(update)).await {
                    Ok(Ok(())) => {}
                    // Inbox receiver gone: the pool is shutting down.
                    Ok(Err(_)) => break,
                    Err(_) => {
                        let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        metrics::record_backpressure_drop("distributor");
                        if dropped % 100 == 0 {
                            warn!(worker = target, dropped, "worker inbox full, dropping");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(price: f64) -> PriceUpdate {
        PriceUpdate {
            symbol: "BTCUSDT".to_string(),
            price,
            timestamp: 0,
            exchange: "exchange1".to_string(),
            received_at: 1,
        }
    }

    #[tokio::test]
    async fn distributes_round_robin() {
        let (agg_tx, agg_rx) = mpsc::channel(10);
        let (a_tx, mut a_rx) = mpsc::channel(10);
        let (b_tx, mut b_rx) = mpsc::channel(10);
        let counters = Arc::new(PipelineCounters::default());
        let task = tokio::spawn(run(
            agg_rx,
            vec![a_tx, b_tx],
            counters,
            CancellationToken::new(),
        ));

        for i in 0..4 {
            agg_tx.send(update(i as f64)).await.unwrap();
        }
        drop(agg_tx);
        task.await.unwrap();

        let mut a = Vec::new();
        while let Some(u) = a_rx.recv().await {
            a.push(u.price);
        }
        let mut b = Vec::new();
        while let Some(u) = b_rx.recv().await {
            b.push(u.price);
        }
        assert_eq!(a, vec![0.0, 2.0]);
        assert_eq!(b, vec![1.0, 3.0]);
    }

    #[tokio::test]
    async fn slow_worker_is_skipped_not_waited_on() {
        let (agg_tx, agg_rx) = mpsc::channel(10);
        // Capacity-one inboxes that nobody drains: every send after the
        // first per inbox exhausts the budget.
        let (a_tx, a_rx) = mpsc::channel(1);
        let (b_tx, b_rx) = mpsc::channel(1);
        let counters = Arc::new(PipelineCounters::default());
        let task = tokio::spawn(run(
            agg_rx,
            vec![a_tx, b_tx],
            counters.clone(),
            CancellationToken::new(),
        ));

        for i in 0..4 {
            agg_tx.send(update(i as f64)).await.unwrap();
        }
        drop(agg_tx);
        task.await.unwrap();

        assert_eq!(counters.dropped.load(Ordering::Relaxed), 2);
        drop(a_rx);
        drop(b_rx);
    }
}
