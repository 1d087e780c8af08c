use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::{ModeController, RunState};
use crate::error::Error;
use crate::interfaces::{Cache, Storage};
use crate::query::period::{parse_period, DEFAULT_PERIOD};
use crate::query::QueryService;
use crate::types::mode::Mode;

pub struct ApiState {
    pub query: QueryService,
    pub controller: Arc<ModeController>,
    pub cache: Arc<dyn Cache>,
    pub storage: Arc<dyn Storage>,
}

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/prices/:operation/:symbol", get(price_by_symbol))
        .route("/prices/:operation/:exchange/:symbol", get(price_by_exchange))
        .route("/mode/:mode", post(switch_mode))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(serde::Deserialize)]
struct PeriodQuery {
    period: Option<String>,
}

async fn price_by_symbol(
    State(state): State<Arc<ApiState>>,
    Path((operation, symbol)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Value>, StatusCode> {
    handle_price(&state, &operation, None, &symbol, query).await
}

async fn price_by_exchange(
    State(state): State<Arc<ApiState>>,
    Path((operation, exchange, symbol)): Path<(String, String, String)>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Value>, StatusCode> {
    handle_price(&state, &operation, Some(exchange), &symbol, query).await
}

async fn handle_price(
    state: &ApiState,
    operation: &str,
    exchange: Option<String>,
    symbol: &str,
    query: PeriodQuery,
) -> Result<Json<Value>, StatusCode> {
    let period = match query.period {
        Some(raw) => parse_period(&raw).map_err(|_| StatusCode::BAD_REQUEST)?,
        None => DEFAULT_PERIOD,
    };
    let exchange = exchange.as_deref();

    let result = match operation {
        "latest" => state
            .query
            .latest(symbol, exchange)
            .await
            .and_then(to_value),
        "highest" => state
            .query
            .highest(symbol, exchange, period)
            .await
            .and_then(to_value),
        "lowest" => state
            .query
            .lowest(symbol, exchange, period)
            .await
            .and_then(to_value),
        "average" => state
            .query
            .average(symbol, exchange, period)
            .await
            .and_then(to_value),
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    match result {
        Ok(value) => Ok(Json(value)),
        Err(Error::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(operation, symbol, error = %e, "price query failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> crate::error::Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Storage(e.to_string()))
}

async fn switch_mode(
    State(state): State<Arc<ApiState>>,
    Path(mode): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let mode: Mode = mode.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let applied = state.controller.switch(mode).await;
    Ok(Json(json!({
        "status": "success",
        "mode": applied.as_str(),
    })))
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let cache_ok = state.cache.ping().await.is_ok();
    let storage_ok = state.storage.ping().await.is_ok();
    let run_state = state.controller.run_state().await;

    let adapters: Value = match state.controller.adapter_health().await {
        Some(adapters) => adapters
            .into_iter()
            .map(|(name, healthy)| {
                (
                    name,
                    Value::String(if healthy { "up" } else { "down" }.to_string()),
                )
            })
            .collect::<serde_json::Map<_, _>>()
            .into(),
        None => Value::String("switching".to_string()),
    };

    Json(json!({
        "status": if cache_ok && storage_ok { "healthy" } else { "degraded" },
        "services": {
            "cache": if cache_ok { "connected" } else { "unreachable" },
            "storage": if storage_ok { "connected" } else { "unreachable" },
            "pipeline": run_state.as_str(),
        },
        "adapters": adapters,
    }))
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let mode = state.controller.mode().await;
    let run_state = state.controller.run_state().await;
    let (processed, rejected, dropped) = state.controller.counters().snapshot();

    Json(json!({
        "current_mode": mode.as_str(),
        "available_modes": ["live", "test"],
        "status": match run_state {
            RunState::Stopped => "stopped",
            RunState::RunningLive | RunState::RunningTest => "running",
        },
        "processed": processed,
        "rejected": rejected,
        "dropped": dropped,
    }))
}

async fn metrics() -> Result<String, StatusCode> {
    let encoder = prometheus::TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Bind and serve until the shutdown future resolves.
pub async fn serve(
    router: Router,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
