pub mod distributor;
pub mod fan_in;
pub mod sink;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::interfaces::Cache;
use crate::observability::metrics;
use crate::types::market::PriceUpdate;

/// Fan-in output buffer; absorbs transient bursts from all adapters.
pub const AGGREGATED_CHANNEL_CAPACITY: usize = 5000;
/// Worker output buffer ahead of the cache writer.
pub const RESULT_CHANNEL_CAPACITY: usize = 10_000;
pub const WORKER_INBOX_CAPACITY: usize = 100;
pub const WORKERS_PER_ADAPTER: usize = 5;

/// How long the distributor waits on a worker inbox before dropping.
pub const DISTRIBUTOR_SEND_BUDGET: Duration = Duration::from_millis(100);
/// How long a worker waits on the result channel before dropping.
pub const WORKER_SEND_BUDGET: Duration = Duration::from_millis(500);
/// Bounded wait for pipeline tasks on shutdown; stragglers are logged and
/// left to the cancellation signal.
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

/// Cumulative pipeline counters; shared across restarts so the status
/// surface survives mode switches.
#[derive(Default)]
pub struct PipelineCounters {
    pub processed: AtomicU64,
    pub rejected: AtomicU64,
    pub dropped: AtomicU64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.processed.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

/// One wired instance of fan-in → distributor → workers → sink.
///
/// Channels are constructed fresh on every start and each is closed by its
/// single owner: forwarders close the aggregated channel by dropping their
/// senders, the distributor closes the worker inboxes the same way, and the
/// workers close the result channel. Teardown therefore cascades from the
/// adapters downward, while the cancellation token short-circuits every
/// stage for urgent shutdown.
pub struct Pipeline {
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Pipeline {
    pub fn start(
        inputs: Vec<mpsc::Receiver<PriceUpdate>>,
        cache: Arc<dyn Cache>,
        counters: Arc<PipelineCounters>,
        cancel: CancellationToken,
    ) -> Self {
        let workers = WORKERS_PER_ADAPTER * inputs.len().max(1);
        let (agg_tx, agg_rx) = mpsc::channel(AGGREGATED_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        let mut tasks = fan_in::spawn(inputs, agg_tx, cancel.clone());

        let mut inboxes = Vec::with_capacity(workers);
        for id in 0..workers {
            let (inbox_tx, inbox_rx) = mpsc::channel(WORKER_INBOX_CAPACITY);
            inboxes.push(inbox_tx);
            tasks.push((
                format!("worker-{id}"),
                tokio::spawn(worker::run(
                    id,
                    inbox_rx,
                    result_tx.clone(),
                    counters.clone(),
                    cancel.clone(),
                )),
            ));
        }
        // The workers now hold the only result senders.
        drop(result_tx);

        tasks.push((
            "distributor".to_string(),
            tokio::spawn(distributor::run(
                agg_rx,
                inboxes,
                counters.clone(),
                cancel.clone(),
            )),
        ));
        tasks.push((
            "sink".to_string(),
            tokio::spawn(sink::run(result_rx, cache, cancel.clone())),
        ));

        metrics::PIPELINE_RUNNING.set(1);
        info!(workers, "pipeline started");
        Pipeline { cancel, tasks }
    }

    /// Cancel and drain with a bound. A task that outlives the bound keeps
    /// running detached until the cancellation signal reaches it; the next
    /// start builds fresh channels either way.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let deadline = Instant::now() + SHUTDOWN_WAIT;
        for (name, handle) in self.tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    error!(task = %name, "pipeline task panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(task = %name, "timed out waiting for pipeline task");
                }
            }
        }
        metrics::PIPELINE_RUNNING.set(0);
        info!("pipeline stopped");
    }
}
