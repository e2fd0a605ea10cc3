//! tiercache HTTP layer
//!
//! Caches whole HTTP responses on top of the tiercache orchestrator:
//! - [`capture`]: response sinks, buffered capture and stored snapshots
//! - [`middleware`]: the axum response cache middleware
//! - [`config`]: middleware configuration, loadable from the environment
//! - [`telemetry`]: tracing subscriber setup

pub mod capture;
pub mod config;
pub mod error;
pub mod middleware;
pub mod telemetry;

pub use capture::{
    capture_response, Chunk, HttpResponseSink, ResponseCapture, ResponseSink, ResponseSnapshot,
    SnapshotContent,
};
pub use config::ResponseCacheConfig;
pub use error::{ApiError, ApiResult, CaptureError, ErrorCode, ResponseCacheError};
pub use middleware::{response_cache_middleware, CacheStatus, ResponseCacheState};
