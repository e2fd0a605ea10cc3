//! tiercache storage
//!
//! The [`StorageBackend`] contract, its implementations, and the
//! [`CacheOrchestrator`] that layers stale-while-revalidate semantics over an
//! ordered list of backends.

pub mod backends;
pub mod cache;

pub use backends::{
    ErrorBackend, LmdbBackend, LmdbBackendError, LruMemoryBackend, MemoryBackend, NoopBackend,
};
#[cfg(feature = "redis")]
pub use backends::{RedisBackend, RedisBackendError};
pub use cache::{
    CacheMeta, CacheOrchestrator, CacheRead, CacheStats, ReadOutcome, SharedBackend, StorageBackend,
};

// Re-export core types for API integration
pub use tiercache_core::{
    BackendError, CacheConfig, CacheError, CacheOptions, CacheResult, Clock, ManualClock,
    SystemClock, TimedValue,
};
