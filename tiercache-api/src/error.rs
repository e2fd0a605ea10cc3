//! Error types for the HTTP layer.
//!
//! Capture failures and middleware failures are separate enums; the latter
//! converts into an [`ApiError`] JSON body when returned from a handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tiercache_core::{CacheError, ConfigError};

/// Result type alias for HTTP layer operations.
pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Machine-readable error codes returned in error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidConfig,
    CacheFailure,
    CaptureFailure,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidConfig
            | ErrorCode::CacheFailure
            | ErrorCode::CaptureFailure
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR
// ============================================================================

/// Structured error body: `{ "code": ..., "message": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::invalid_config(err.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Config(e) => e.into(),
            other => Self::new(ErrorCode::CacheFailure, other.to_string()),
        }
    }
}

// ============================================================================
// CAPTURE ERRORS
// ============================================================================

/// Errors raised while buffering or replaying a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// A text chunk followed a binary one, or the reverse.
    #[error("Response mixes text and binary chunks")]
    MixedContent,

    /// A stored header could not be turned back into a real header.
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The downstream body failed before it was fully read.
    #[error("Downstream body failed: {reason}")]
    Downstream { reason: String },
}

impl CaptureError {
    pub fn invalid_header(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// MIDDLEWARE ERRORS
// ============================================================================

/// Errors surfaced by the response cache middleware.
#[derive(Debug, Error)]
pub enum ResponseCacheError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl IntoResponse for ResponseCacheError {
    fn into_response(self) -> Response {
        let error = match self {
            ResponseCacheError::Cache(e) => {
                tracing::error!(error = %e, "Response cache failed");
                ApiError::from(e)
            }
            ResponseCacheError::Capture(e) => {
                tracing::error!(error = %e, "Response capture failed");
                ApiError::new(ErrorCode::CaptureFailure, e.to_string())
            }
        };

        error.into_response()
    }
}

// ============================================================================
// TESTS
// ============================================================================
