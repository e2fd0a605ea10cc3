use async_trait::async_trait;
use tiercache_core::BackendError;

use crate::cache::StorageBackend;

const NAME: &str = "ErrorBackend";

/// Fails every operation with [`BackendError::Unavailable`].
///
/// Useful for exercising the orchestrator's failure paths.
#[derive(Debug, Clone)]
pub struct ErrorBackend {
    reason: String,
}

impl ErrorBackend {
    pub fn new() -> Self {
        Self::with_reason("backend is configured to fail")
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for ErrorBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for ErrorBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn get(&self, _key: &str) -> Result<String, BackendError> {
        Err(BackendError::unavailable(NAME, self.reason.clone()))
    }

    async fn set(&self, _key: &str, _value: String) -> Result<String, BackendError> {
        Err(BackendError::unavailable(NAME, self.reason.clone()))
    }
}
