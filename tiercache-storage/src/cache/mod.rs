//! Cache layer: backend contract, orchestrator and read results.
//!
//! The orchestrator never evicts and never locks across processes. It
//! searches an ordered list of backends, keeps them loosely in sync by
//! backfilling, and decides from envelope TTLs whether a value is served,
//! served while refreshing, or refreshed before returning.
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheOrchestrator::new(
//!     vec![Arc::new(LruMemoryBackend::new(capacity)), Arc::new(lmdb)],
//!     CacheConfig::new().with_name("users"),
//! )?;
//!
//! let user = cache
//!     .wrap(&json!({"id": 42}), || load_user(42), CacheOptions::new().with_stale_ttl(ttl))
//!     .await?;
//! ```

pub mod orchestrator;
pub mod read;
pub mod traits;

pub use orchestrator::{CacheOrchestrator, SharedBackend};
pub use read::{CacheMeta, CacheRead, ReadOutcome};
pub use traits::{CacheStats, StorageBackend};
