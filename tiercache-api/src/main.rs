//! tiercache demo server
//!
//! `/stale`, `/expire` and `/both` wrap a slow counter with different TTLs;
//! `/r` is served through the response cache middleware.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use tiercache_api::telemetry::{init_tracing, TelemetryConfig};
use tiercache_api::{
    response_cache_middleware, ApiError, ApiResult, ResponseCacheConfig, ResponseCacheState,
};
use tiercache_storage::{
    CacheConfig, CacheOptions, CacheOrchestrator, LmdbBackend, LruMemoryBackend, SharedBackend,
};
use tower_http::trace::TraceLayer;

/// Simulated origin latency.
const ORIGIN_DELAY: Duration = Duration::from_millis(2500);

const DEFAULT_LRU_CAPACITY: usize = 1024;
const LMDB_MAX_SIZE_MB: usize = 256;

#[derive(Clone)]
struct DemoState {
    cache: CacheOrchestrator,
    counter: Arc<AtomicU64>,
}

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let backends = build_backends().await?;
    let counter = Arc::new(AtomicU64::new(0));

    let demo = DemoState {
        cache: CacheOrchestrator::new(backends.clone(), CacheConfig::new().with_name("demo"))?,
        counter: Arc::clone(&counter),
    };

    let response_cache = ResponseCacheState::new(backends, ResponseCacheConfig::from_env())?;
    let cached_routes = Router::new()
        .route("/r", get(cached_page))
        .with_state(counter)
        .layer(middleware::from_fn_with_state(
            response_cache,
            response_cache_middleware,
        ));

    let app = Router::new()
        .route("/stale", get(stale))
        .route("/expire", get(expire))
        .route("/both", get(both))
        .with_state(demo)
        .merge(cached_routes)
        .layer(TraceLayer::new_for_http());

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting tiercache demo server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// LRU in front, then LMDB and Redis when configured.
async fn build_backends() -> ApiResult<Vec<SharedBackend>> {
    let capacity = std::env::var("TIERCACHE_LRU_CAPACITY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .and_then(NonZeroUsize::new)
        .or(NonZeroUsize::new(DEFAULT_LRU_CAPACITY))
        .ok_or_else(|| ApiError::invalid_config("LRU capacity must be non-zero"))?;

    let mut backends: Vec<SharedBackend> = vec![Arc::new(LruMemoryBackend::new(capacity))];

    if let Ok(path) = std::env::var("TIERCACHE_LMDB_PATH") {
        std::fs::create_dir_all(&path)
            .map_err(|e| ApiError::invalid_config(format!("Cannot create {}: {}", path, e)))?;
        let lmdb = LmdbBackend::open(&path, LMDB_MAX_SIZE_MB)
            .map_err(|e| ApiError::internal_error(format!("Failed to open LMDB: {}", e)))?;
        backends.push(Arc::new(lmdb));
    }

    #[cfg(feature = "redis")]
    if let Ok(url) = std::env::var("TIERCACHE_REDIS_URL") {
        let redis = tiercache_storage::RedisBackend::connect(&url)
            .await
            .map_err(|e| ApiError::internal_error(format!("Failed to connect to Redis: {}", e)))?;
        backends.push(Arc::new(redis));
    }

    let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    tracing::info!(backends = ?names, "Cache backends ready");

    Ok(backends)
}

/// Slow counter standing in for an expensive origin call.
async fn next_value(counter: Arc<AtomicU64>) -> Result<u64, std::convert::Infallible> {
    let value = counter.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(ORIGIN_DELAY).await;
    Ok(value)
}

async fn wrapped(state: DemoState, kind: &'static str, options: CacheOptions) -> ApiResult<Json<Value>> {
    let counter = Arc::clone(&state.counter);
    let value = state
        .cache
        .wrap(kind, move || next_value(counter), options)
        .await?;
    Ok(Json(json!({ "type": kind, "value": value })))
}

async fn stale(State(state): State<DemoState>) -> ApiResult<Json<Value>> {
    let options = CacheOptions::new().with_stale_ttl(Duration::from_secs(5));
    wrapped(state, "stale", options).await
}

async fn expire(State(state): State<DemoState>) -> ApiResult<Json<Value>> {
    let options = CacheOptions::new().with_expire_ttl(Duration::from_secs(5));
    wrapped(state, "expire", options).await
}

async fn both(State(state): State<DemoState>) -> ApiResult<Json<Value>> {
    let options = CacheOptions::new()
        .with_stale_ttl(Duration::from_secs(5))
        .with_expire_ttl(Duration::from_secs(10));
    wrapped(state, "both", options).await
}

async fn cached_page(State(counter): State<Arc<AtomicU64>>) -> Json<Value> {
    let value = counter.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "page": "r", "value": value }))
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let addr = std::env::var("TIERCACHE_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_config(format!("Invalid listen address {}: {}", addr, e)))
}
