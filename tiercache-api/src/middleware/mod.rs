//! Middleware for tiercache-api
//!
//! - `response_cache`: stale-while-revalidate caching of whole responses
//!
//! Install it innermost so the snapshot reflects the handler's own output:
//!
//! ```ignore
//! Router::new()
//!     .route("/r", get(handler))
//!     .layer(middleware::from_fn_with_state(cache_state, response_cache_middleware))
//!     .layer(TraceLayer::new_for_http())
//! ```

pub mod response_cache;

pub use response_cache::{response_cache_middleware, CacheStatus, ResponseCacheState};
