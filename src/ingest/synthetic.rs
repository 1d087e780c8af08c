use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::ingest::{SourceAdapter, ADAPTER_CHANNEL_CAPACITY};
use crate::observability::metrics;
use crate::types::market::{PriceUpdate, SUPPORTED_SYMBOLS};
use crate::utils::helper::current_timestamp_ms;

pub const TEST_EXCHANGES: [&str; 3] = ["test-exchange1", "test-exchange2", "test-exchange3"];

const MIN_TICK: Duration = Duration::from_millis(100);
const MAX_TICK: Duration = Duration::from_secs(10);

/// Walk clamp: generated prices stay within ±20 % of the base price.
const MAX_DEVIATION: f64 = 0.2;
/// Fraction of the step attributed to the current trend.
const TREND_STRENGTH: f64 = 0.1;
/// Chance per tick that the trend reverses on its own.
const TREND_FLIP_PROBABILITY: f64 = 0.05;
/// Chance per tick of a ±5 % spike on top of the walk.
const SPIKE_PROBABILITY: f64 = 0.005;

fn base_price(symbol: &str) -> f64 {
    match symbol {
        "BTCUSDT" => 96_000.0,
        "DOGEUSDT" => 0.32,
        "TONUSDT" => 5.45,
        "SOLUSDT" => 210.0,
        "ETHUSDT" => 3_300.0,
        _ => 1.0,
    }
}

fn volatility(symbol: &str) -> f64 {
    match symbol {
        "BTCUSDT" => 0.02,
        "DOGEUSDT" => 0.05,
        "TONUSDT" => 0.04,
        "SOLUSDT" => 0.03,
        "ETHUSDT" => 0.025,
        _ => 0.02,
    }
}

/// Synthetic exchange: one generator task per symbol, each running a bounded
/// random walk around the symbol's base price.
pub struct SyntheticAdapter {
    name: String,
    tick: Duration,
    running: Arc<AtomicBool>,
    stop: CancellationToken,
}

impl SyntheticAdapter {
    pub fn new(name: impl Into<String>, tick: Duration) -> Self {
        SyntheticAdapter {
            name: name.into(),
            tick: tick.clamp(MIN_TICK, MAX_TICK),
            running: Arc::new(AtomicBool::new(false)),
            stop: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl SourceAdapter for SyntheticAdapter {
    async fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<PriceUpdate>> {
        let (tx, rx) = mpsc::channel(ADAPTER_CHANNEL_CAPACITY);
        self.stop = cancel.child_token();
        self.running.store(true, Ordering::SeqCst);

        for symbol in SUPPORTED_SYMBOLS {
            let generator = Generator::new(&self.name, symbol, self.tick);
            tokio::spawn(generator.run(tx.clone(), self.stop.clone()));
        }
        // All senders are owned by the generators; the channel closes once
        // the last of them returns.
        drop(tx);

        info!(exchange = %self.name, tick_ms = self.tick.as_millis() as u64, "synthetic adapter started");
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.stop.cancel();
        self.running.store(false, Ordering::SeqCst);
        info!(exchange = %self.name, "synthetic adapter stopped");
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct Generator {
    exchange: String,
    symbol: &'static str,
    tick: Duration,
    rng: StdRng,
    base: f64,
    volatility: f64,
    current: f64,
    trend: f64,
}

impl Generator {
    fn new(exchange: &str, symbol: &'static str, tick: Duration) -> Self {
        // Seed per (exchange, symbol) so the walks are uncorrelated but
        // reproducible.
        let mut hasher = DefaultHasher::new();
        (exchange, symbol).hash(&mut hasher);
        let base = base_price(symbol);
        Generator {
            exchange: exchange.to_string(),
            symbol,
            tick,
            rng: StdRng::seed_from_u64(hasher.finish()),
            base,
            volatility: volatility(symbol),
            current: base,
            trend: 1.0,
        }
    }

    async fn run(mut self, tx: mpsc::Sender<PriceUpdate>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = current_timestamp_ms();
                    let update = PriceUpdate {
                        symbol: self.symbol.to_string(),
                        price: self.next_price(),
                        timestamp: now,
                        exchange: self.exchange.clone(),
                        received_at: now,
                    };
                    metrics::record_ingested(&self.exchange);
                    if tx.try_send(update).is_err() {
                        metrics::record_backpressure_drop("adapter");
                    }
                }
            }
        }
    }

    fn next_price(&mut self) -> f64 {
        let mut change = (self.rng.gen::<f64>() - 0.5) * 2.0 * self.volatility * self.current;
        change += change * TREND_STRENGTH * self.trend;

        let mut price = self.current + change;

        // Clamp to the deviation band and reverse the trend at the edge.
        let max_deviation = self.base * MAX_DEVIATION;
        if price > self.base + max_deviation {
            price = self.base + max_deviation;
            self.trend = -1.0;
        } else if price < self.base - max_deviation {
            price = self.base - max_deviation;
            self.trend = 1.0;
        }
        if price <= 0.0 {
            price = self.base * 0.01;
        }

        if self.rng.gen::<f64>() < TREND_FLIP_PROBABILITY {
            self.trend = -self.trend;
        }

        // Rare market event: a spike on top of the walk.
        if self.rng.gen::<f64>() < SPIKE_PROBABILITY {
            price *= 1.0 + (self.rng.gen::<f64>() - 0.5) * 0.1;
        }

        price = round_price(price);
        self.current = price;
        price
    }
}

/// Tick-size-aware rounding: 2 decimals above 1000, 3 above 10, 4 below.
fn round_price(price: f64) -> f64 {
    if price > 1000.0 {
        (price * 100.0).round() / 100.0
    } else if price > 10.0 {
        (price * 1000.0).round() / 1000.0
    } else {
        (price * 10_000.0).round() / 10_000.0
    }
}
