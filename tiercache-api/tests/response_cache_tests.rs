//! End-to-end tests for the response cache middleware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Router};
use serde_json::json;
use tiercache_api::{response_cache_middleware, ResponseCacheConfig, ResponseCacheState};
use tiercache_core::NO_CACHE_DIRECTIVE;
use tiercache_storage::{CacheConfig, MemoryBackend, SharedBackend, StorageBackend};
use tiercache_test_utils::{ManualClock, RecordingBackend};
use tower::ServiceExt;

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    app: Router,
    state: ResponseCacheState,
    clock: ManualClock,
    calls: Arc<AtomicU64>,
}

impl Harness {
    fn new(backends: Vec<SharedBackend>, config: ResponseCacheConfig) -> Self {
        let clock = ManualClock::starting_now();
        let state = ResponseCacheState::with_clock(backends, config, Arc::new(clock.clone()))
            .expect("valid config");
        let calls = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&calls);
        let text = get(move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                ([("x-origin", "handler")], format!("v{}", n))
            }
        })
        .post(|| async { "posted" });

        let counter = Arc::clone(&calls);
        let binary = get(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ([(CONTENT_TYPE, "image/png")], vec![0x89u8, 0x50, 0x4e, 0x47, 0x00, 0xff])
            }
        });

        let app = Router::new()
            .route("/r", text)
            .route("/img", binary)
            .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
            .route("/broken", get(broken_body))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                response_cache_middleware,
            ));

        Self {
            app,
            state,
            clock,
            calls,
        }
    }

    fn memory(config: ResponseCacheConfig) -> (Self, Arc<MemoryBackend>) {
        let memory = Arc::new(MemoryBackend::new());
        (Self::new(vec![memory.clone()], config), memory)
    }

    async fn send(&self, request: Request<Body>) -> (Response, Bytes) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.expect("body");
        (Response::from_parts(parts, Body::empty()), bytes)
    }

    async fn get(&self, uri: &str) -> (Response, Bytes) {
        self.send(request(Method::GET, uri)).await
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn broken_body() -> Response {
    let stream = futures_util::stream::iter(vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"partial")),
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "origin hung up")),
    ]);
    ([(CONTENT_TYPE, "text/plain")], Body::from_stream(stream)).into_response()
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn swr_config() -> ResponseCacheConfig {
    ResponseCacheConfig::new(
        CacheConfig::new()
            .with_name("http")
            .with_stale_ttl(Duration::from_millis(500))
            .with_expire_ttl(Duration::from_secs(5)),
    )
}

// ============================================================================
// STALE-WHILE-REVALIDATE FLOW
// ============================================================================

#[tokio::test]
async fn test_miss_cached_stale_expired_sequence() {
    let (h, _) = Harness::memory(swr_config());

    let (first, body) = h.get("/r").await;
    assert_eq!(header(&first, "cache-status"), Some("miss"));
    assert_eq!(body, "v1");

    let (second, body) = h.get("/r").await;
    assert_eq!(header(&second, "cache-status"), Some("cached"));
    assert_eq!(body, "v1");
    assert_eq!(h.calls(), 1);

    h.clock.advance(Duration::from_millis(600));
    let (stale, body) = h.get("/r").await;
    assert_eq!(header(&stale, "cache-status"), Some("cached"));
    assert_eq!(body, "v1");

    h.state.cache().drain_background().await;
    assert_eq!(h.calls(), 2);

    let (refreshed, body) = h.get("/r").await;
    assert_eq!(header(&refreshed, "cache-status"), Some("cached"));
    assert_eq!(body, "v2");

    h.clock.advance(Duration::from_secs(5));
    let (expired, body) = h.get("/r").await;
    assert_eq!(header(&expired, "cache-status"), Some("expired"));
    assert_eq!(body, "v3");
    assert_eq!(h.calls(), 3);
}

#[tokio::test]
async fn test_replay_keeps_status_and_headers() {
    let (h, _) = Harness::memory(swr_config());

    let (_, _) = h.get("/r").await;
    let (cached, _) = h.get("/r").await;

    assert_eq!(cached.status(), StatusCode::OK);
    assert_eq!(header(&cached, "x-origin"), Some("handler"));
    assert_eq!(
        header(&cached, "content-type"),
        Some("text/plain; charset=utf-8")
    );
}

#[tokio::test]
async fn test_cache_control_reflects_ttl() {
    let config = ResponseCacheConfig::new(
        CacheConfig::new().with_stale_ttl(Duration::from_secs(30)),
    );
    let (h, _) = Harness::memory(config);

    let (miss, _) = h.get("/r").await;
    assert_eq!(header(&miss, "cache-control"), Some("public, max-age=30"));

    h.clock.advance(Duration::from_secs(10));
    let (cached, _) = h.get("/r").await;
    assert_eq!(header(&cached, "cache-control"), Some("public, max-age=20"));
}

#[tokio::test]
async fn test_no_ttl_entry_is_not_publicly_cacheable() {
    let (h, _) = Harness::memory(ResponseCacheConfig::default());

    let (miss, _) = h.get("/r").await;
    assert_eq!(
        miss.headers().get(CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some(NO_CACHE_DIRECTIVE)
    );

    let (cached, body) = h.get("/r").await;
    assert_eq!(header(&cached, "cache-status"), Some("cached"));
    assert_eq!(body, "v1");
}

#[tokio::test]
async fn test_query_string_is_part_of_key() {
    let (h, _) = Harness::memory(swr_config());

    let (_, a) = h.get("/r?page=1").await;
    let (_, b) = h.get("/r?page=2").await;
    let (again, a2) = h.get("/r?page=1").await;

    assert_eq!(a, "v1");
    assert_eq!(b, "v2");
    assert_eq!(a2, "v1");
    assert_eq!(header(&again, "cache-status"), Some("cached"));
}

// ============================================================================
// PASS-THROUGH
// ============================================================================

#[tokio::test]
async fn test_bypass_runs_handler_and_keeps_entry() {
    let (h, _) = Harness::memory(swr_config());
    h.get("/r").await;

    let bypass = Request::builder()
        .uri("/r")
        .header("cache-bypass", "1")
        .body(Body::empty())
        .expect("request");
    let (response, body) = h.send(bypass).await;
    assert_eq!(header(&response, "cache-status"), Some("bypass"));
    assert_eq!(body, "v2");

    let (cached, body) = h.get("/r").await;
    assert_eq!(header(&cached, "cache-status"), Some("cached"));
    assert_eq!(body, "v1");
}

#[tokio::test]
async fn test_bypass_on_cold_cache_stores_nothing() {
    let (h, memory) = Harness::memory(swr_config());

    let bypass = Request::builder()
        .uri("/r")
        .header("cache-bypass", "true")
        .body(Body::empty())
        .expect("request");
    h.send(bypass).await;

    assert!(memory.is_empty());
}

#[tokio::test]
async fn test_empty_bypass_header_is_served_from_cache() {
    let (h, _) = Harness::memory(swr_config());
    h.get("/r").await;

    let blank = Request::builder()
        .uri("/r")
        .header("cache-bypass", "")
        .body(Body::empty())
        .expect("request");
    let (response, body) = h.send(blank).await;

    assert_eq!(header(&response, "cache-status"), Some("cached"));
    assert_eq!(body, "v1");
    assert_eq!(h.calls(), 1);
}

#[tokio::test]
async fn test_unlisted_method_is_skipped() {
    let (h, memory) = Harness::memory(swr_config());

    let (response, body) = h.send(request(Method::POST, "/r")).await;
    assert_eq!(header(&response, "cache-status"), Some("skipMethod"));
    assert_eq!(body, "posted");
    assert!(memory.is_empty());
}

#[tokio::test]
async fn test_custom_header_names() {
    let config = swr_config()
        .with_bypass_header("x-no-cache")
        .with_status_header("x-cache");
    let (h, _) = Harness::memory(config);

    let (miss, _) = h.get("/r").await;
    assert_eq!(header(&miss, "x-cache"), Some("miss"));
    assert_eq!(header(&miss, "cache-status"), None);

    let bypass = Request::builder()
        .uri("/r")
        .header("x-no-cache", "1")
        .body(Body::empty())
        .expect("request");
    let (response, _) = h.send(bypass).await;
    assert_eq!(header(&response, "x-cache"), Some("bypass"));
}

// ============================================================================
// BODIES
// ============================================================================

#[tokio::test]
async fn test_binary_body_round_trips() {
    let (h, _) = Harness::memory(swr_config());

    let (_, original) = h.get("/img").await;
    let (cached, replayed) = h.get("/img").await;

    assert_eq!(header(&cached, "cache-status"), Some("cached"));
    assert_eq!(header(&cached, "content-type"), Some("image/png"));
    assert_eq!(original, replayed);
    assert_eq!(replayed.as_ref(), &[0x89, 0x50, 0x4e, 0x47, 0x00, 0xff]);
}

#[tokio::test]
async fn test_empty_body_is_cached() {
    let (h, _) = Harness::memory(swr_config());

    let (miss, body) = h.get("/empty").await;
    assert_eq!(miss.status(), StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let (cached, body) = h.get("/empty").await;
    assert_eq!(header(&cached, "cache-status"), Some("cached"));
    assert_eq!(cached.status(), StatusCode::NO_CONTENT);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_failing_body_writes_no_entry() {
    let (h, memory) = Harness::memory(swr_config());

    let (response, body) = h.get("/broken").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: serde_json::Value = serde_json::from_slice(&body).expect("json error body");
    assert_eq!(error["code"], "CAPTURE_FAILURE");

    assert!(memory.is_empty());
}

// ============================================================================
// STORAGE INTERACTION
// ============================================================================

#[tokio::test]
async fn test_malformed_entry_is_treated_as_miss() {
    let (h, memory) = Harness::memory(swr_config());
    let key = h
        .state
        .cache()
        .derive_key(&json!({"method": "GET", "url": "/r"}))
        .expect("key");
    memory.set(&key, "{ not an envelope".to_string()).await.expect("seed");

    let (response, body) = h.get("/r").await;
    assert_eq!(header(&response, "cache-status"), Some("miss"));
    assert_eq!(body, "v1");
}

#[tokio::test]
async fn test_second_tier_hit_is_backfilled() {
    let config = || {
        ResponseCacheConfig::new(CacheConfig::new().with_stale_ttl(Duration::from_secs(60)))
    };
    let front = RecordingBackend::shared("front");
    let back = RecordingBackend::shared("back");
    let backends: Vec<SharedBackend> = vec![front.clone(), back.clone()];
    let h = Harness::new(backends, config());

    h.get("/r").await;
    let key = back.written_keys().pop().expect("stored in back tier");
    assert!(front.contains(&key));

    // A cold front tier refills from the back one.
    let clean_front = RecordingBackend::shared("front");
    let backends: Vec<SharedBackend> = vec![clean_front.clone(), back.clone()];
    let refill = Harness::new(backends, config());

    let (response, body) = refill.get("/r").await;
    refill.state.cache().drain_background().await;

    assert_eq!(header(&response, "cache-status"), Some("cached"));
    assert_eq!(body, "v1");
    assert!(clean_front.contains(&key));
    assert_eq!(refill.calls(), 0);
}

#[tokio::test]
async fn test_stats_track_decisions() {
    let (h, _) = Harness::memory(swr_config());

    h.get("/r").await;
    h.get("/r").await;
    h.clock.advance(Duration::from_millis(600));
    h.get("/r").await;
    h.state.cache().drain_background().await;

    let stats = h.state.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.stale_hits, 1);
    assert_eq!(stats.refreshes, 1);
}
