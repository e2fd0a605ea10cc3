//! Configuration types

use std::time::Duration;

use crate::error::ConfigError;

/// Namespace used when none is configured.
pub const DEFAULT_NAME: &str = "default";

/// Instance-wide cache configuration.
///
/// TTLs here are defaults; per-call [`CacheOptions`] override them field by
/// field. With neither set a stored value is never stale and never expires.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Key namespace, the `{name}` in `{name}:cache:{hash}`.
    pub name: String,
    /// Default stale TTL.
    pub stale_ttl: Option<Duration>,
    /// Default expire TTL.
    pub expire_ttl: Option<Duration>,
    /// Attach cache metadata to reads.
    pub debug: bool,
    /// Skip a background refresh when one for the same key is in flight.
    pub collapse_background_refresh: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            stale_ttl: None,
            expire_ttl: None,
            debug: false,
            collapse_background_refresh: false,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stale_ttl(mut self, ttl: Duration) -> Self {
        self.stale_ttl = Some(ttl);
        self
    }

    pub fn with_expire_ttl(mut self, ttl: Duration) -> Self {
        self.expire_ttl = Some(ttl);
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn with_collapse_background_refresh(mut self, enabled: bool) -> Self {
        self.collapse_background_refresh = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - name is non-empty and contains no `:`
    /// - default stale TTL does not exceed default expire TTL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                value: self.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }

        if self.name.contains(':') {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                value: self.name.clone(),
                reason: "name must not contain ':'".to_string(),
            });
        }

        if let (Some(stale), Some(expire)) = (self.stale_ttl, self.expire_ttl) {
            if stale > expire {
                return Err(ConfigError::InvalidValue {
                    field: "stale_ttl".to_string(),
                    value: format!("{:?}", stale),
                    reason: format!("stale_ttl must not exceed expire_ttl ({:?})", expire),
                });
            }
        }

        Ok(())
    }
}

/// Per-call TTL overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub stale_ttl: Option<Duration>,
    pub expire_ttl: Option<Duration>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_ttl(mut self, ttl: Duration) -> Self {
        self.stale_ttl = Some(ttl);
        self
    }

    pub fn with_expire_ttl(mut self, ttl: Duration) -> Self {
        self.expire_ttl = Some(ttl);
        self
    }

    /// Fill unset fields from the instance defaults.
    pub fn merged_over(&self, defaults: &CacheConfig) -> CacheOptions {
        CacheOptions {
            stale_ttl: self.stale_ttl.or(defaults.stale_ttl),
            expire_ttl: self.expire_ttl.or(defaults.expire_ttl),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
