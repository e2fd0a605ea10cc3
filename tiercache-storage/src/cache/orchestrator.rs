//! Multi-backend cache orchestrator with stale-while-revalidate semantics.
//!
//! The orchestrator owns an ordered, read-only list of [`StorageBackend`]s.
//! Reads search the list front to back and backfill every backend that
//! missed; writes fan out to all of them concurrently. [`wrap`] layers the
//! TTL state machine on top:
//!
//! ```text
//! LOOKUP -> MISS    -> REFRESH_SYNC
//!        -> EXPIRED -> REFRESH_SYNC
//!        -> STALE   -> REFRESH_ASYNC + RETURN_STALE
//!        -> FRESH   -> RETURN
//! ```
//!
//! Background work (backfills, stale refreshes) runs on `tokio::spawn` and is
//! tracked so [`drain_background`] can await it. Concurrent callers that see
//! the same stale or missing entry each run the producer; the optional
//! `collapse_background_refresh` flag only suppresses duplicate background
//! refreshes.
//!
//! [`wrap`]: CacheOrchestrator::wrap
//! [`drain_background`]: CacheOrchestrator::drain_background

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tiercache_core::key::derive_key as derive_namespaced_key;
use tiercache_core::{
    BoxError, CacheConfig, CacheError, CacheOptions, CacheResult, Clock, Freshness, SystemClock,
    TimedValue,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::read::{CacheRead, ReadOutcome};
use super::traits::{CacheStats, StatsCounters, StorageBackend};

/// A backend shared between the orchestrator and its background tasks.
pub type SharedBackend = Arc<dyn StorageBackend>;

/// Cheaply cloneable handle; clones share backends, counters and tasks.
#[derive(Clone)]
pub struct CacheOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    backends: Arc<[SharedBackend]>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    stats: StatsCounters,
    background: Mutex<Vec<JoinHandle<()>>>,
    refreshing: DashSet<String>,
}

/// Marks a key as having a background refresh in flight until dropped.
struct RefreshSlot {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        self.inner.refreshing.remove(&self.key);
    }
}

impl fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.inner.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("CacheOrchestrator")
            .field("backends", &names)
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .finish()
    }
}

impl CacheOrchestrator {
    /// Create an orchestrator over `backends` (searched in order) using the
    /// system clock.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if `config` fails validation.
    pub fn new(backends: Vec<SharedBackend>, config: CacheConfig) -> CacheResult<Self> {
        Self::with_clock(backends, config, Arc::new(SystemClock))
    }

    /// Create an orchestrator that reads time from `clock`.
    pub fn with_clock(
        backends: Vec<SharedBackend>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                backends: backends.into(),
                config,
                clock,
                stats: StatsCounters::default(),
                background: Mutex::new(Vec::new()),
                refreshing: DashSet::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn backends(&self) -> &[SharedBackend] {
        &self.inner.backends
    }

    /// Current instant according to the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Namespaced storage key for any serializable input.
    pub fn derive_key<K: Serialize + ?Sized>(&self, input: &K) -> CacheResult<String> {
        derive_namespaced_key(&self.inner.config.name, input)
    }

    // ========================================================================
    // Raw access
    // ========================================================================

    /// Search backends in order and return the first stored value.
    ///
    /// Every backend queried before the hit is backfilled in the background.
    /// Backend errors are logged and count as misses.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] when no backend has the key.
    pub async fn get(&self, key: &str) -> CacheResult<String> {
        let mut missed: Vec<SharedBackend> = Vec::new();

        for backend in self.inner.backends.iter() {
            match backend.get(key).await {
                Ok(value) => {
                    debug!(key = %key, backend = backend.name(), backfill = missed.len(), "cache hit");
                    if !missed.is_empty() {
                        self.backfill(key.to_string(), value.clone(), missed);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_not_found() => {
                    debug!(key = %key, backend = backend.name(), "backend miss");
                    missed.push(Arc::clone(backend));
                }
                Err(e) => {
                    warn!(key = %key, backend = backend.name(), error = %e, "backend read failed, treating as miss");
                    StatsCounters::bump(&self.inner.stats.backend_errors);
                    missed.push(Arc::clone(backend));
                }
            }
        }

        Err(CacheError::NotFound {
            key: key.to_string(),
        })
    }

    /// Write `value` to every backend concurrently.
    ///
    /// Failures are logged and ignored; the original value is returned even
    /// when every write fails.
    pub async fn set(&self, key: &str, value: String) -> String {
        let backends = Arc::clone(&self.inner.backends);
        self.write_all(&backends, key, value).await
    }

    async fn write_all(&self, targets: &[SharedBackend], key: &str, value: String) -> String {
        let writes = targets.iter().map(|backend| {
            let value = value.clone();
            async move { (backend.name(), backend.set(key, value).await) }
        });

        for (backend, result) in join_all(writes).await {
            if let Err(e) = result {
                warn!(key = %key, backend = backend, error = %e, "backend write failed");
                StatsCounters::bump(&self.inner.stats.backend_errors);
            }
        }

        value
    }

    fn backfill(&self, key: String, value: String, targets: Vec<SharedBackend>) {
        let this = self.clone();
        self.spawn_background(async move {
            this.write_all(&targets, &key, value).await;
            debug!(key = %key, backends = targets.len(), "backfill complete");
        });
    }

    // ========================================================================
    // Envelope operations
    // ========================================================================

    /// Wrap `payload` in a new [`TimedValue`] and write it everywhere.
    ///
    /// TTLs come from `options`, falling back to the instance defaults.
    pub async fn build_and_set<T: Serialize>(
        &self,
        key: &str,
        payload: T,
        options: &CacheOptions,
    ) -> CacheResult<TimedValue<T>> {
        let options = options.merged_over(&self.inner.config);
        let value = TimedValue::new(payload, self.now())
            .with_stale_ttl(options.stale_ttl)
            .with_expire_ttl(options.expire_ttl);

        let blob = value.serialize()?;
        self.set(key, blob).await;

        Ok(value)
    }

    /// Run `producer`, store its result under `key` and return it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Producer`] if the producer fails; nothing is
    /// stored in that case.
    pub async fn refresh<T, F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &CacheOptions,
    ) -> CacheResult<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        Ok(self.refresh_timed(key, producer, options).await?.into_value())
    }

    async fn refresh_timed<T, F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &CacheOptions,
    ) -> CacheResult<TimedValue<T>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let payload = producer().await.map_err(CacheError::producer)?;
        let value = self.build_and_set(key, payload, options).await?;
        StatsCounters::bump(&self.inner.stats.refreshes);
        Ok(value)
    }

    // ========================================================================
    // Stale-while-revalidate
    // ========================================================================

    /// Cached call of `producer`, keyed by `input`.
    ///
    /// Fresh values are returned as-is, stale values are returned while a
    /// background refresh runs, and expired or missing values block on a
    /// synchronous refresh.
    pub async fn wrap<K, T, F, Fut, E>(
        &self,
        input: &K,
        producer: F,
        options: CacheOptions,
    ) -> CacheResult<T>
    where
        K: Serialize + ?Sized,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Ok(self.wrap_read(input, producer, options).await?.into_value())
    }

    /// Like [`wrap`](Self::wrap), but also reports which branch was taken and,
    /// in debug mode, the stored metadata.
    pub async fn wrap_read<K, T, F, Fut, E>(
        &self,
        input: &K,
        producer: F,
        options: CacheOptions,
    ) -> CacheResult<CacheRead<T>>
    where
        K: Serialize + ?Sized,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let key = self.derive_key(input)?;
        let debug = self.inner.config.debug;

        let stored = match self.get(&key).await {
            Ok(raw) => match TimedValue::<T>::deserialize(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "discarding malformed cache entry");
                    None
                }
            },
            Err(e) => {
                debug!(key = %key, error = %e, "cache lookup missed");
                None
            }
        };

        let Some(stored) = stored else {
            self.record_outcome(ReadOutcome::Miss);
            let fresh = self.refresh_timed(&key, producer, &options).await?;
            return Ok(CacheRead::new(key, fresh, ReadOutcome::Miss, debug));
        };

        match stored.freshness(self.now()) {
            Freshness::Expired => {
                debug!(key = %key, "entry expired, refreshing");
                self.record_outcome(ReadOutcome::Expired);
                let fresh = self.refresh_timed(&key, producer, &options).await?;
                Ok(CacheRead::new(key, fresh, ReadOutcome::Expired, debug))
            }
            Freshness::Stale => {
                debug!(key = %key, "entry stale, serving and refreshing in background");
                self.record_outcome(ReadOutcome::Stale);
                self.refresh_in_background(key.clone(), producer, options);
                Ok(CacheRead::new(key, stored, ReadOutcome::Stale, debug))
            }
            Freshness::Fresh => {
                self.record_outcome(ReadOutcome::Fresh);
                Ok(CacheRead::new(key, stored, ReadOutcome::Fresh, debug))
            }
        }
    }

    /// Run [`refresh`](Self::refresh) as a tracked background task.
    ///
    /// Producer failures are logged and counted, leaving the stored value
    /// untouched. With `collapse_background_refresh` set, a second call for a
    /// key whose refresh is still running is dropped.
    pub fn refresh_in_background<T, F, Fut, E>(&self, key: String, producer: F, options: CacheOptions)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let collapse = self.inner.config.collapse_background_refresh;
        if collapse && !self.inner.refreshing.insert(key.clone()) {
            debug!(key = %key, "background refresh already in flight");
            return;
        }

        let this = self.clone();
        let slot = collapse.then(|| RefreshSlot {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
        });
        self.spawn_background(async move {
            // Released on completion, panic or cancellation.
            let _slot = slot;
            match this.refresh_timed(&key, producer, &options).await {
                Ok(_) => debug!(key = %key, "background refresh stored"),
                Err(e) => {
                    warn!(key = %key, error = %e, "background refresh failed");
                    StatsCounters::bump(&this.inner.stats.background_failures);
                }
            }
        });
    }

    /// Count a read decided outside [`wrap_read`](Self::wrap_read), e.g. by
    /// the HTTP middleware.
    pub fn record_outcome(&self, outcome: ReadOutcome) {
        let stats = &self.inner.stats;
        let counter = match outcome {
            ReadOutcome::Fresh => &stats.hits,
            ReadOutcome::Stale => &stats.stale_hits,
            ReadOutcome::Expired => &stats.expired,
            ReadOutcome::Miss => &stats.misses,
        };
        StatsCounters::bump(counter);
    }

    // ========================================================================
    // Background tasks
    // ========================================================================

    /// Spawn `task` on the runtime and track its handle.
    pub fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self
            .inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tracked background tasks that have not finished.
    pub fn pending_background(&self) -> usize {
        self.inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Await every outstanding background task, including ones spawned while
    /// draining.
    pub async fn drain_background(&self) {
        loop {
            let handles = {
                let mut guard = self
                    .inner
                    .background
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *guard)
            };

            if handles.is_empty() {
                return;
            }

            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background task did not complete");
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
