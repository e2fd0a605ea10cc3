use async_trait::async_trait;
use tiercache_core::BackendError;

use crate::cache::StorageBackend;

/// Stores nothing. Every `get` misses and every `set` succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

impl NoopBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageBackend for NoopBackend {
    fn name(&self) -> &str {
        "NoopBackend"
    }

    async fn get(&self, key: &str) -> Result<String, BackendError> {
        Err(BackendError::not_found(key))
    }

    async fn set(&self, _key: &str, value: String) -> Result<String, BackendError> {
        Ok(value)
    }
}
