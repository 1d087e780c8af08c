use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::error::{Error, Result};
use crate::ingest::{SourceAdapter, ADAPTER_CHANNEL_CAPACITY};
use crate::observability::metrics;
use crate::types::market::PriceUpdate;
use crate::utils::helper::current_timestamp_ms;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Reads newline-delimited JSON price records from one upstream exchange
/// over a persistent TCP connection.
pub struct LiveAdapter {
    name: String,
    addr: String,
    running: Arc<AtomicBool>,
    stop: CancellationToken,
}

impl LiveAdapter {
    pub fn new(name: impl Into<String>, cfg: &ExchangeConfig) -> Self {
        LiveAdapter {
            name: name.into(),
            addr: format!("{}:{}", cfg.host, cfg.port),
            running: Arc::new(AtomicBool::new(false)),
            stop: CancellationToken::new(),
        }
    }

    async fn probe(&self) -> Result<TcpStream> {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Error::Connect {
                target: self.addr.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::Connect {
                target: self.addr.clone(),
                reason: "connect timed out".to_string(),
            }),
        }
    }
}

#[async_trait]
impl SourceAdapter for LiveAdapter {
    async fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<PriceUpdate>> {
        // Dial once up front so a dead upstream is visible to the caller;
        // reconnects after that are the reader's business.
        let stream = self.probe().await?;

        let (tx, rx) = mpsc::channel(ADAPTER_CHANNEL_CAPACITY);
        self.stop = cancel.child_token();
        self.running.store(true, Ordering::SeqCst);

        let reader = ReaderTask {
            name: self.name.clone(),
            addr: self.addr.clone(),
            cancel: self.stop.clone(),
            tx,
        };
        tokio::spawn(reader.run(stream));

        info!(exchange = %self.name, addr = %self.addr, "live adapter started");
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.stop.cancel();
        self.running.store(false, Ordering::SeqCst);
        info!(exchange = %self.name, "live adapter stopped");
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Owns the outbound sender; dropping it on return closes the channel
/// exactly once.
struct ReaderTask {
    name: String,
    addr: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<PriceUpdate>,
}

impl ReaderTask {
    async fn run(self, initial: TcpStream) {
        let mut stream = Some(initial);
        loop {
            let conn = match stream.take() {
                Some(conn) => conn,
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        attempt = TcpStream::connect(&self.addr) => match attempt {
                            Ok(conn) => conn,
                            Err(e) => {
                                warn!(exchange = %self.name, error = %e, "reconnect failed");
                                if self.backoff().await.is_err() {
                                    return;
                                }
                                continue;
                            }
                        }
                    }
                }
            };

            info!(exchange = %self.name, addr = %self.addr, "connected");
            self.read_lines(conn).await;
            if self.cancel.is_cancelled() {
                return;
            }
            warn!(exchange = %self.name, "connection lost, retrying");
            if self.backoff().await.is_err() {
                return;
            }
        }
    }

    /// Consumes the connection until EOF, read error or cancellation.
    async fn read_lines(&self, conn: TcpStream) {
        let mut lines = BufReader::new(conn).lines();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.emit(&line),
                    Ok(None) => return,
                    Err(e) => {
                        warn!(exchange = %self.name, error = %e, "read failed");
                        return;
                    }
                }
            }
        }
    }

    fn emit(&self, line: &str) {
        let decoded: crate::error::Result<PriceUpdate> =
            serde_json::from_str(line).map_err(|e| Error::Decode(e.to_string()));
        let mut update = match decoded {
            Ok(update) => update,
            Err(e) => {
                metrics::record_decode_failure(&self.name);
                debug!(exchange = %self.name, error = %e, "skipping record");
                return;
            }
        };
        update.exchange = self.name.clone();
        update.received_at = current_timestamp_ms();

        metrics::record_ingested(&self.name);
        if self.tx.try_send(update).is_err() {
            // Buffer full (or shutdown racing ahead): drop, never block the reader.
            metrics::record_backpressure_drop("adapter");
        }
    }

    async fn backoff(&self) -> std::result::Result<(), ()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(()),
            _ = sleep(RECONNECT_BACKOFF) => Ok(()),
        }
    }
}
