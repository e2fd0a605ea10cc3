//! Error types for tiercache operations

use thiserror::Error;

/// Boxed error produced by a user-supplied producer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a single storage backend.
///
/// `NotFound` is the only variant the orchestrator treats as an ordinary
/// miss; every other variant is logged and then also treated as a miss
/// for that backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{key} not found in cache")]
    NotFound { key: String },

    #[error("Backend {backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Backend {backend} rejected write for {key}: {reason}")]
    Rejected {
        backend: String,
        key: String,
        reason: String,
    },

    #[error("Backend {backend} lock poisoned")]
    LockPoisoned { backend: String },

    #[error("Backend {backend} I/O error: {reason}")]
    Io { backend: String, reason: String },

    #[error("Backend {backend} codec error: {reason}")]
    Codec { backend: String, reason: String },
}

impl BackendError {
    /// Miss for `key`.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Backend could not be reached or refused to serve.
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Every backend missed (or failed) for this key.
    #[error("{key} not found in cache")]
    NotFound { key: String },

    /// A stored value could not be decoded as an envelope.
    #[error("Malformed cache envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    /// The wrapped producer failed.
    #[error("Producer failed: {0}")]
    Producer(#[source] BoxError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    /// Wrap any producer failure.
    pub fn producer<E: Into<BoxError>>(err: E) -> Self {
        Self::Producer(err.into())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Backend(BackendError::NotFound { .. })
        )
    }

    pub fn is_producer(&self) -> bool {
        matches!(self, Self::Producer(_))
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
