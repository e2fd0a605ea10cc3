//! Unbounded in-process backend.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tiercache_core::BackendError;

use crate::cache::StorageBackend;

const NAME: &str = "MemoryBackend";

/// A `HashMap` behind a `RwLock`. Never evicts.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `entries` already stored.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }

    /// Raw stored value, bypassing the async contract.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.read().ok().and_then(|m| m.get(key).cloned())
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

fn poisoned() -> BackendError {
    BackendError::LockPoisoned {
        backend: NAME.to_string(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn get(&self, key: &str) -> Result<String, BackendError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::not_found(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<String, BackendError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.clone());
        Ok(value)
    }
}
