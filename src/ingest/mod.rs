pub mod live;
pub mod synthetic;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::market::PriceUpdate;

/// Outbound buffer per adapter. Emission is non-blocking: a full buffer
/// drops the newest record rather than stalling the reader.
pub const ADAPTER_CHANNEL_CAPACITY: usize = 1000;

/// One upstream source of price updates.
///
/// `start` constructs a fresh outbound channel on every call; the channel is
/// closed exactly once, when the emitting tasks drop their senders. Tasks
/// terminate on the cancellation signal, never on channel identity.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<PriceUpdate>>;

    async fn stop(&mut self);

    fn name(&self) -> &str;

    /// Running since the last `start`, not yet stopped.
    fn healthy(&self) -> bool;
}
