//! Bounded in-process backend with least-recently-used eviction.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use tiercache_core::BackendError;

use crate::cache::StorageBackend;

const NAME: &str = "LruMemoryBackend";

/// An `lru::LruCache` behind a `Mutex`.
///
/// Reads promote the entry, so a `get` takes the lock exclusively.
#[derive(Debug)]
pub struct LruMemoryBackend {
    entries: Mutex<LruCache<String, String>>,
}

impl LruMemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().map(|c| c.cap().get()).unwrap_or(0)
    }

    /// Check presence without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|c| c.contains(key))
            .unwrap_or(false)
    }
}

fn poisoned() -> BackendError {
    BackendError::LockPoisoned {
        backend: NAME.to_string(),
    }
}

#[async_trait]
impl StorageBackend for LruMemoryBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn get(&self, key: &str) -> Result<String, BackendError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::not_found(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<String, BackendError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.put(key.to_string(), value.clone());
        Ok(value)
    }
}
