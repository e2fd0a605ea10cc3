//! Response Cache Middleware
//!
//! Caches complete responses (status, headers, body) for allow-listed
//! methods and replays them with stale-while-revalidate semantics.
//!
//! # Flow
//!
//! 1. Bypass header set to a non-empty value: run the handler, mark `bypass`, never touch the cache.
//! 2. Method not allow-listed: run the handler, mark `skipMethod`.
//! 3. Fresh entry: replay it, mark `cached`. The handler does not run.
//! 4. Stale entry: replay it, mark `cached`, and re-run the handler in the
//!    background to store a new snapshot.
//! 5. Expired or missing entry: run the handler, capture and store its
//!    response, then send it marked `expired` or `miss`.
//!
//! Every replayed or freshly stored response carries a `Cache-Control`
//! header computed from the entry's TTLs.
//!
//! # Example
//!
//! ```ignore
//! use axum::{middleware, routing::get, Router};
//! use tiercache_api::middleware::{response_cache_middleware, ResponseCacheState};
//!
//! let state = ResponseCacheState::new(backends, ResponseCacheConfig::from_env())?;
//!
//! let app = Router::new()
//!     .route("/r", get(handler))
//!     .layer(middleware::from_fn_with_state(state, response_cache_middleware));
//! ```

use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Request, State},
    http::{header::CACHE_CONTROL, HeaderValue},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use tiercache_core::{CacheOptions, Clock, Freshness, SystemClock, TimedValue};
use tiercache_storage::{CacheOrchestrator, ReadOutcome, SharedBackend};
use tracing::{debug, warn};

use crate::capture::{capture_response, HttpResponseSink, ResponseSink, ResponseSnapshot};
use crate::config::{ResolvedNames, ResponseCacheConfig};
use crate::error::{ApiResult, CaptureError, ResponseCacheError};

// ============================================================================
// CACHE STATUS
// ============================================================================

/// Value written to the status header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Miss,
    Cached,
    Expired,
    Bypass,
    SkipMethod,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Miss => "miss",
            CacheStatus::Cached => "cached",
            CacheStatus::Expired => "expired",
            CacheStatus::Bypass => "bypass",
            CacheStatus::SkipMethod => "skipMethod",
        }
    }
}

// ============================================================================
// STATE
// ============================================================================

/// State shared by every request passing through the middleware.
#[derive(Debug, Clone)]
pub struct ResponseCacheState {
    cache: CacheOrchestrator,
    names: Arc<ResolvedNames>,
}

impl ResponseCacheState {
    /// Build the middleware state over `backends`, searched in order.
    pub fn new(backends: Vec<SharedBackend>, config: ResponseCacheConfig) -> ApiResult<Self> {
        Self::with_clock(backends, config, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), with an injected clock.
    pub fn with_clock(
        backends: Vec<SharedBackend>,
        config: ResponseCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> ApiResult<Self> {
        let names = config.resolve()?;
        let cache = CacheOrchestrator::with_clock(backends, config.cache, clock)?;

        Ok(Self {
            cache,
            names: Arc::new(names),
        })
    }

    /// The orchestrator backing this middleware.
    pub fn cache(&self) -> &CacheOrchestrator {
        &self.cache
    }
}

// ============================================================================
// KEY
// ============================================================================

/// Fields of a request that identify its cached response.
#[derive(Debug, Serialize)]
struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    fn from_request(request: &Request) -> Self {
        let url = request
            .extensions()
            .get::<OriginalUri>()
            .map(|original| original.0.to_string())
            .unwrap_or_else(|| request.uri().to_string());

        Self {
            method: request.method().to_string(),
            url,
        }
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Response cache middleware function.
pub async fn response_cache_middleware(
    State(state): State<ResponseCacheState>,
    request: Request,
    next: Next,
) -> Result<Response, ResponseCacheError> {
    let names = state.names.as_ref();

    if wants_bypass(&request, names) {
        debug!(uri = %request.uri(), "response cache bypassed");
        let mut response = next.run(request).await;
        mark(&mut response, names, CacheStatus::Bypass);
        return Ok(response);
    }

    if !names.include_methods.contains(request.method()) {
        let mut response = next.run(request).await;
        mark(&mut response, names, CacheStatus::SkipMethod);
        return Ok(response);
    }

    let key = state.cache.derive_key(&RequestKey::from_request(&request))?;
    let now = state.cache.now();

    let mut expired = false;
    if let Some(entry) = lookup(&state.cache, &key).await {
        match entry.freshness(now) {
            Freshness::Expired => expired = true,
            freshness => match render(&entry, now, names, CacheStatus::Cached) {
                Ok(response) => {
                    if freshness == Freshness::Stale {
                        debug!(key = %key, "serving stale response, revalidating");
                        state.cache.record_outcome(ReadOutcome::Stale);
                        revalidate(&state.cache, key, request, next);
                    } else {
                        debug!(key = %key, "serving cached response");
                        state.cache.record_outcome(ReadOutcome::Fresh);
                    }
                    return Ok(response);
                }
                Err(e) => warn!(key = %key, error = %e, "discarding unreplayable cache entry"),
            },
        }
    }

    let (outcome, status) = if expired {
        (ReadOutcome::Expired, CacheStatus::Expired)
    } else {
        (ReadOutcome::Miss, CacheStatus::Miss)
    };
    state.cache.record_outcome(outcome);
    debug!(key = %key, status = status.as_str(), "capturing downstream response");

    let snapshot = capture_response(next.run(request).await).await?;
    let entry = state
        .cache
        .build_and_set(&key, snapshot, &CacheOptions::default())
        .await?;

    Ok(render(&entry, state.cache.now(), names, status)?)
}

/// Stored snapshot for `key`, if any backend has a decodable one.
async fn lookup(cache: &CacheOrchestrator, key: &str) -> Option<TimedValue<ResponseSnapshot>> {
    let raw = match cache.get(key).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!(key = %key, error = %e, "response cache lookup missed");
            return None;
        }
    };

    match TimedValue::deserialize(&raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(key = %key, error = %e, "discarding malformed cache entry");
            None
        }
    }
}

/// Re-run the downstream handler in the background and store its response.
///
/// The client has already been answered from the stale entry.
fn revalidate(cache: &CacheOrchestrator, key: String, request: Request, next: Next) {
    cache.refresh_in_background(
        key,
        move || async move { capture_response(next.run(request).await).await },
        CacheOptions::default(),
    );
}

/// Drive the real transport from a stored entry.
fn render(
    entry: &TimedValue<ResponseSnapshot>,
    now: chrono::DateTime<chrono::Utc>,
    names: &ResolvedNames,
    status: CacheStatus,
) -> Result<Response, CaptureError> {
    let mut sink = HttpResponseSink::new();
    entry.get().replay(&mut sink)?;

    let directive = entry.cache_control(now);
    let cache_control = HeaderValue::try_from(directive.as_str())
        .map_err(|e| CaptureError::invalid_header(CACHE_CONTROL.as_str(), e))?;
    sink.set_header(CACHE_CONTROL, cache_control);
    sink.set_header(
        names.status_header.clone(),
        HeaderValue::from_static(status.as_str()),
    );

    sink.finish()
}

/// The bypass header only counts when it carries a non-empty value.
fn wants_bypass(request: &Request, names: &ResolvedNames) -> bool {
    request
        .headers()
        .get_all(&names.bypass_header)
        .iter()
        .any(|value| !value.as_bytes().trim_ascii().is_empty())
}

fn mark(response: &mut Response, names: &ResolvedNames, status: CacheStatus) {
    response.headers_mut().insert(
        names.status_header.clone(),
        HeaderValue::from_static(status.as_str()),
    );
}

// ============================================================================
// TESTS
// ============================================================================
