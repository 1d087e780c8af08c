use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ExchangesConfig;
use crate::ingest::live::LiveAdapter;
use crate::ingest::synthetic::{SyntheticAdapter, TEST_EXCHANGES};
use crate::ingest::SourceAdapter;
use crate::interfaces::Cache;
use crate::observability::metrics;
use crate::pipeline::{Pipeline, PipelineCounters};
use crate::types::mode::Mode;

/// Lifecycle state of the ingestion chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    RunningLive,
    RunningTest,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::RunningLive => "running",
            RunState::RunningTest => "running",
        }
    }
}

/// Everything one running chain owns: adapters, the wired pipeline and the
/// cancel token that unwinds both. Pure data; adapters never reference back
/// into the controller.
struct Running {
    mode: Mode,
    adapters: Vec<Box<dyn SourceAdapter>>,
    pipeline: Pipeline,
    cancel: CancellationToken,
}

/// Owns the live/test mode state and performs the atomic
/// stop-rewire-start on mode changes.
///
/// Two locks, per the transition table: `run` (an async mutex around the
/// running chain) is held across the whole stop-then-start so concurrent
/// switches serialize; `mode` and `state` are read-write locks for the
/// query surface and are never held across blocking I/O.
pub struct ModeController {
    cfg: ExchangesConfig,
    cache: Arc<dyn Cache>,
    counters: Arc<PipelineCounters>,
    mode: RwLock<Mode>,
    state: RwLock<RunState>,
    run: Mutex<Option<Running>>,
}

impl ModeController {
    pub fn new(cfg: ExchangesConfig, cache: Arc<dyn Cache>) -> Self {
        ModeController {
            cfg,
            cache,
            counters: Arc::new(PipelineCounters::default()),
            mode: RwLock::new(Mode::Live),
            state: RwLock::new(RunState::Stopped),
            run: Mutex::new(None),
        }
    }

    /// Initial start. When a live start brings up zero adapters and
    /// `auto_fallback` is set, the controller rebuilds in test mode; this is
    /// the documented startup policy and never applies to manual switches.
    pub async fn start(&self, mode: Mode) -> Mode {
        let mut run = self.run.lock().await;
        if run.is_some() {
            warn!("start requested while already running");
            return *self.mode.read().await;
        }

        let started = self.start_locked(&mut run, mode).await;
        if mode == Mode::Live && started == 0 && self.cfg.auto_fallback {
            warn!("no live adapter started, falling back to test mode");
            if let Some(running) = run.take() {
                Self::stop_running(running).await;
            }
            self.start_locked(&mut run, Mode::Test).await;
            self.publish(Mode::Test).await;
            return Mode::Test;
        }

        self.publish(mode).await;
        mode
    }

    /// Switch modes: no-op when the target mode is already running,
    /// otherwise stop, rebuild fresh adapters, restart. Serialized by the
    /// run lock.
    pub async fn switch(&self, mode: Mode) -> Mode {
        let mut run = self.run.lock().await;
        if let Some(running) = run.as_ref() {
            if running.mode == mode {
                info!(mode = %mode, "already in requested mode");
                return mode;
            }
        }

        if let Some(running) = run.take() {
            *self.state.write().await = RunState::Stopped;
            Self::stop_running(running).await;
        }
        self.start_locked(&mut run, mode).await;
        self.publish(mode).await;
        metrics::record_mode_switch(mode.as_str());
        mode
    }

    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        if let Some(running) = run.take() {
            Self::stop_running(running).await;
        }
        *self.state.write().await = RunState::Stopped;
    }

    pub async fn mode(&self) -> Mode {
        *self.mode.read().await
    }

    pub async fn run_state(&self) -> RunState {
        *self.state.read().await
    }

    pub fn counters(&self) -> Arc<PipelineCounters> {
        self.counters.clone()
    }

    /// Health of the current adapters; `None` while a switch is in flight.
    pub async fn adapter_health(&self) -> Option<Vec<(String, bool)>> {
        let run = self.run.try_lock().ok()?;
        Some(
            run.as_ref()
                .map(|running| {
                    running
                        .adapters
                        .iter()
                        .map(|a| (a.name().to_string(), a.healthy()))
                        .collect()
                })
                .unwrap_or_default(),
        )
    }

    /// Build fresh adapters and wire a fresh pipeline. Returns how many
    /// adapters came up; the chain runs (possibly empty) regardless, so a
    /// dead upstream leaves the mode observable rather than killing the
    /// process.
    async fn start_locked(&self, run: &mut Option<Running>, mode: Mode) -> usize {
        let cancel = CancellationToken::new();
        let mut adapters = self.build_adapters(mode);

        let mut inputs = Vec::with_capacity(adapters.len());
        for adapter in adapters.iter_mut() {
            match adapter.start(cancel.clone()).await {
                Ok(rx) => inputs.push(rx),
                Err(e) => {
                    warn!(adapter = adapter.name(), error = %e, "adapter failed to start");
                }
            }
        }
        let started = inputs.len();

        let pipeline = Pipeline::start(
            inputs,
            self.cache.clone(),
            self.counters.clone(),
            cancel.clone(),
        );
        *run = Some(Running {
            mode,
            adapters,
            pipeline,
            cancel,
        });

        info!(mode = %mode, adapters = started, "data processing started");
        started
    }

    async fn stop_running(mut running: Running) {
        info!(mode = %running.mode, "stopping data processing");
        running.cancel.cancel();
        for adapter in running.adapters.iter_mut() {
            adapter.stop().await;
        }
        running.pipeline.shutdown().await;
    }

    async fn publish(&self, mode: Mode) {
        *self.mode.write().await = mode;
        *self.state.write().await = match mode {
            Mode::Live => RunState::RunningLive,
            Mode::Test => RunState::RunningTest,
        };
    }

    fn build_adapters(&self, mode: Mode) -> Vec<Box<dyn SourceAdapter>> {
        match mode {
            Mode::Live => self
                .cfg
                .live_endpoints()
                .into_iter()
                .map(|(name, endpoint)| {
                    Box::new(LiveAdapter::new(name, &endpoint)) as Box<dyn SourceAdapter>
                })
                .collect(),
            Mode::Test => {
                let tick = Duration::from_millis(self.cfg.test_tick_ms.max(1));
                TEST_EXCHANGES
                    .iter()
                    .map(|name| {
                        Box::new(SyntheticAdapter::new(*name, tick)) as Box<dyn SourceAdapter>
                    })
                    .collect()
            }
        }
    }
}
