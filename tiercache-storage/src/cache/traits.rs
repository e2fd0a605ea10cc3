//! Storage backend contract and cache statistics.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tiercache_core::BackendError;

/// A key/value store the orchestrator can search and write to.
///
/// Values are opaque UTF-8 strings (serialized envelopes). A backend
/// signals an ordinary miss with [`BackendError::NotFound`]; any other
/// error is logged by the caller and treated as a miss for that backend.
///
/// Implementations must be internally synchronized: the orchestrator
/// shares one instance across every request and background task.
/// Eviction, if any, is the backend's own business.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short identifier used in log fields.
    fn name(&self) -> &str;

    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<String, BackendError>;

    /// Store `value` under `key`, returning what was stored.
    async fn set(&self, key: &str, value: String) -> Result<String, BackendError>;
}

/// Snapshot of orchestrator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh values served.
    pub hits: u64,
    /// Stale values served while a refresh was scheduled.
    pub stale_hits: u64,
    /// Expired values that forced a synchronous refresh.
    pub expired: u64,
    /// Lookups where no backend had a usable value.
    pub misses: u64,
    /// Producer invocations that completed and were stored.
    pub refreshes: u64,
    /// Background refreshes whose producer failed.
    pub background_failures: u64,
    /// Backend errors other than `NotFound`.
    pub backend_errors: u64,
}

impl CacheStats {
    /// Fraction of lookups answered from cache (fresh or stale), 0.0 to 1.0.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.expired + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) stale_hits: AtomicU64,
    pub(crate) expired: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) refreshes: AtomicU64,
    pub(crate) background_failures: AtomicU64,
    pub(crate) backend_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            background_failures: self.background_failures.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }
}
