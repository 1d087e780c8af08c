use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use marketflow::aggregation::{Aggregator, CleanupTicker};
use marketflow::api::{self, ApiState};
use marketflow::cache::{MemoryCache, RedisCache};
use marketflow::config::AppConfig;
use marketflow::core::ModeController;
use marketflow::error::Result;
use marketflow::interfaces::{Cache, Storage};
use marketflow::observability;
use marketflow::query::QueryService;
use marketflow::storage::SqliteStorage;
use marketflow::types::mode::Mode;
use marketflow::AGGREGATION_WINDOW;

#[derive(Parser)]
#[command(
    name = "marketflow",
    about = "Real-time market data ingestion, aggregation and query service"
)]
struct Cli {
    /// HTTP listen port (overrides server.port from the configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Path to the configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    observability::init_tracing();

    let cfg = match AppConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let port = cli.port.unwrap_or(cfg.server.port);

    if let Err(e) = run(cfg, port).await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig, port: u16) -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&cfg.database)?);
    info!(database = %cfg.database.name, "storage ready");

    // A cache outage at startup degrades to the in-process cache instead of
    // refusing to boot; reads and writes keep the same contract.
    let cache: Arc<dyn Cache> = match RedisCache::connect(&cfg.cache).await {
        Ok(cache) => {
            info!(host = %cfg.cache.host, port = cfg.cache.port, "cache connected");
            Arc::new(cache)
        }
        Err(e) => {
            warn!(error = %e, "cache unreachable, continuing on in-memory cache");
            Arc::new(MemoryCache::new())
        }
    };

    let controller = Arc::new(ModeController::new(cfg.exchanges.clone(), cache.clone()));
    let started = controller.start(Mode::Live).await;
    info!(mode = %started, "ingestion started");

    let background = CancellationToken::new();
    let aggregator = Aggregator::new(cache.clone(), storage.clone(), AGGREGATION_WINDOW);
    let aggregator_task = tokio::spawn(aggregator.run(background.clone()));
    let cleanup = CleanupTicker::new(cache.clone(), storage.clone());
    let cleanup_task = tokio::spawn(cleanup.run(background.clone()));

    let state = Arc::new(ApiState {
        query: QueryService::new(cache.clone(), storage.clone()),
        controller: controller.clone(),
        cache,
        storage,
    });
    let router = api::create_router(state);
    api::rest::serve(router, port, shutdown_signal()).await?;

    info!("shutting down");
    background.cancel();
    controller.stop().await;
    let _ = aggregator_task.await;
    let _ = cleanup_task.await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
