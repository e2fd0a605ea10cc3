//! tiercache Test Utilities
//!
//! Centralized test infrastructure for the tiercache workspace:
//! - Proptest generators for TTLs, options and key inputs
//! - Instrumented backends that record or fail on demand
//! - Counting producers for asserting how often a value was rebuilt

// Re-export core types for convenience
pub use tiercache_core::{
    BackendError, CacheConfig, CacheError, CacheOptions, CacheResult, Clock, ManualClock,
    TimedValue,
};
pub use tiercache_storage::{CacheOrchestrator, MemoryBackend, SharedBackend, StorageBackend};

use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Ready;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// INSTRUMENTED BACKENDS
// ============================================================================

/// In-memory backend that counts every call and remembers write order.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    label: String,
    entries: Mutex<HashMap<String, String>>,
    gets: AtomicUsize,
    writes: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Shared handle, ready to hand to an orchestrator.
    pub fn shared(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(label))
    }

    /// Store `value` directly, without counting it as a write.
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.into(), value.into());
        }
    }

    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().ok().and_then(|e| e.get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Keys written through `set`, in call order.
    pub fn written_keys(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

fn poisoned(label: &str) -> BackendError {
    BackendError::LockPoisoned {
        backend: label.to_string(),
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn get(&self, key: &str) -> Result<String, BackendError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock().map_err(|_| poisoned(&self.label))?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::not_found(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<String, BackendError> {
        self.writes
            .lock()
            .map_err(|_| poisoned(&self.label))?
            .push(key.to_string());
        self.entries
            .lock()
            .map_err(|_| poisoned(&self.label))?
            .insert(key.to_string(), value.clone());
        Ok(value)
    }
}

/// Backend whose reads fail with `Unavailable` while tripped.
///
/// Writes always land, so a tripped backend still gets backfilled.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: RecordingBackend,
    tripped: AtomicBool,
}

impl FlakyBackend {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: RecordingBackend::new(label),
            tripped: AtomicBool::new(true),
        }
    }

    pub fn shared(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(label))
    }

    pub fn set_tripped(&self, tripped: bool) {
        self.tripped.store(tripped, Ordering::SeqCst);
    }

    pub fn recorder(&self) -> &RecordingBackend {
        &self.inner
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<String, BackendError> {
        if self.tripped.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable(self.inner.name(), "tripped"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<String, BackendError> {
        self.inner.set(key, value).await
    }
}

// ============================================================================
// PRODUCERS
// ============================================================================

/// Producer factory that returns 1, 2, 3, ... on successive calls.
#[derive(Debug, Clone, Default)]
pub struct CountingProducer {
    calls: Arc<AtomicU32>,
}

impl CountingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A one-shot producer that bumps the shared counter and yields the new count.
    pub fn producer(&self) -> impl FnOnce() -> Ready<Result<u32, Infallible>> + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move || std::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
    }

    /// A one-shot producer that counts the call and then fails.
    pub fn failing(&self, reason: &'static str) -> impl FnOnce() -> Ready<Result<u32, &'static str>> + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(reason))
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built orchestrators for common scenarios.

    use super::*;

    /// Orchestrator over `backends` driven by a fresh [`ManualClock`].
    pub fn orchestrator(
        backends: Vec<SharedBackend>,
        config: CacheConfig,
    ) -> (CacheOrchestrator, ManualClock) {
        let clock = ManualClock::starting_now();
        let cache = CacheOrchestrator::with_clock(backends, config, Arc::new(clock.clone()))
            .expect("fixture config must be valid");
        (cache, clock)
    }

    /// `n` recording backends labelled `b0..b{n-1}`.
    pub fn recording_backends(n: usize) -> Vec<Arc<RecordingBackend>> {
        (0..n).map(|i| RecordingBackend::shared(format!("b{}", i))).collect()
    }

    /// Erase concrete backend types for the orchestrator.
    pub fn as_shared<B: StorageBackend + 'static>(backends: &[Arc<B>]) -> Vec<SharedBackend> {
        backends
            .iter()
            .map(|b| Arc::clone(b) as SharedBackend)
            .collect()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tiercache inputs.

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use serde_json::{Map, Value};
    use std::time::Duration;

    /// Optional TTL up to one day, millisecond resolution.
    pub fn arb_ttl() -> impl Strategy<Value = Option<Duration>> {
        prop::option::of((0u64..86_400_000).prop_map(Duration::from_millis))
    }

    /// Per-call options with arbitrary overrides.
    pub fn arb_options() -> impl Strategy<Value = CacheOptions> {
        (arb_ttl(), arb_ttl()).prop_map(|(stale_ttl, expire_ttl)| CacheOptions {
            stale_ttl,
            expire_ttl,
        })
    }

    /// A timestamp between 2020 and 2030, whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1_577_836_800i64..1_893_456_000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// Namespace accepted by `CacheConfig::validate`.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    /// Scalar JSON leaf.
    pub fn arb_json_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 /?=&]{0,24}".prop_map(Value::String),
        ]
    }

    /// Nested JSON value, up to three levels deep.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_json_scalar().prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    /// A flat JSON object, the usual shape of a cache key input.
    pub fn arb_key_object() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-z]{1,8}", arb_json_scalar(), 1..6)
            .prop_map(|m| m.into_iter().collect())
    }
}
