use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::market::PriceUpdate;

/// Merge the adapter channels into the aggregated channel.
///
/// One forwarder per input. Each holds a clone of the aggregated sender, so
/// the aggregated channel closes exactly once: when the last forwarder
/// returns, whether because its input drained or because of cancellation.
/// Ordering across inputs is unspecified; within one input it is preserved.
pub fn spawn(
    inputs: Vec<mpsc::Receiver<PriceUpdate>>,
    out: mpsc::Sender<PriceUpdate>,
    cancel: CancellationToken,
) -> Vec<(String, JoinHandle<()>)> {
    inputs
        .into_iter()
        .enumerate()
        .map(|(id, mut rx)| {
            let out = out.clone();
            let cancel = cancel.clone();
            let name = format!("fan-in-{id}");
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        item = rx.recv() => {
                            let Some(update) = item else {
                                debug!(input = id, "input channel drained");
                                break;
                            };
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                sent = out.send(update) => {
                                    if sent.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
            });
            (name, handle)
        })
        .collect()
}
