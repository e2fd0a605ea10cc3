//! Response cache middleware configuration.

use std::time::Duration;

use axum::http::{HeaderName, Method};
use tiercache_core::{CacheConfig, ConfigError};

pub const DEFAULT_BYPASS_HEADER: &str = "cache-bypass";
pub const DEFAULT_STATUS_HEADER: &str = "cache-status";

/// Options for [`response_cache_middleware`](crate::middleware::response_cache_middleware).
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCacheConfig {
    /// Namespace, default TTLs and debug flag for the underlying cache.
    pub cache: CacheConfig,
    /// Requests carrying this header skip the cache entirely.
    pub bypass_header: String,
    /// Response header that reports the cache decision.
    pub status_header: String,
    /// Methods eligible for caching.
    pub include_methods: Vec<String>,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            bypass_header: DEFAULT_BYPASS_HEADER.to_string(),
            status_header: DEFAULT_STATUS_HEADER.to_string(),
            include_methods: vec![Method::GET.to_string()],
        }
    }
}

impl ResponseCacheConfig {
    pub fn new(cache: CacheConfig) -> Self {
        Self {
            cache,
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut cache = CacheConfig::new()
            .with_debug(env_flag("TIERCACHE_DEBUG"))
            .with_collapse_background_refresh(env_flag("TIERCACHE_COLLAPSE_REFRESH"));
        if let Ok(name) = std::env::var("TIERCACHE_NAME") {
            cache = cache.with_name(name);
        }
        if let Some(ttl) = env_secs("TIERCACHE_STALE_TTL_SECS") {
            cache = cache.with_stale_ttl(ttl);
        }
        if let Some(ttl) = env_secs("TIERCACHE_EXPIRE_TTL_SECS") {
            cache = cache.with_expire_ttl(ttl);
        }

        let include_methods = std::env::var("TIERCACHE_INCLUDE_METHODS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_ascii_uppercase())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|methods| !methods.is_empty())
            .unwrap_or(defaults.include_methods);

        Self {
            cache,
            bypass_header: std::env::var("TIERCACHE_BYPASS_HEADER")
                .unwrap_or(defaults.bypass_header),
            status_header: std::env::var("TIERCACHE_STATUS_HEADER")
                .unwrap_or(defaults.status_header),
            include_methods,
        }
    }

    pub fn with_bypass_header(mut self, name: impl Into<String>) -> Self {
        self.bypass_header = name.into();
        self
    }

    pub fn with_status_header(mut self, name: impl Into<String>) -> Self {
        self.status_header = name.into();
        self
    }

    pub fn with_include_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.resolve().map(|_| ())
    }

    /// Parse header names and methods into their HTTP types.
    pub(crate) fn resolve(&self) -> Result<ResolvedNames, ConfigError> {
        let bypass_header = parse_header("bypass_header", &self.bypass_header)?;
        let status_header = parse_header("status_header", &self.status_header)?;

        if self.include_methods.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "include_methods".to_string(),
                value: String::new(),
                reason: "at least one method is required".to_string(),
            });
        }

        let include_methods = self
            .include_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.as_bytes()).map_err(|e| ConfigError::InvalidValue {
                    field: "include_methods".to_string(),
                    value: m.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedNames {
            bypass_header,
            status_header,
            include_methods,
        })
    }
}

/// Header names and methods in their parsed form.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedNames {
    pub bypass_header: HeaderName,
    pub status_header: HeaderName,
    pub include_methods: Vec<Method>,
}

fn parse_header(field: &str, value: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::try_from(value).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = ResponseCacheConfig::default();
        assert_eq!(config.bypass_header, "cache-bypass");
        assert_eq!(config.status_header, "cache-status");
        assert_eq!(config.include_methods, vec!["GET".to_string()]);
        assert_eq!(config.cache.stale_ttl, None);
        assert_eq!(config.cache.expire_ttl, None);
        assert!(config.validate().is_ok());
    }

    // Single test so the env mutations never race each other.
    #[test]
    fn test_from_env() {
        let _name = EnvVarGuard::set("TIERCACHE_NAME", Some("pages"));
        let _stale = EnvVarGuard::set("TIERCACHE_STALE_TTL_SECS", Some("0.5"));
        let _expire = EnvVarGuard::set("TIERCACHE_EXPIRE_TTL_SECS", Some("5"));
        let _methods = EnvVarGuard::set("TIERCACHE_INCLUDE_METHODS", Some("get, head"));
        let _debug = EnvVarGuard::set("TIERCACHE_DEBUG", Some("true"));
        let _bypass = EnvVarGuard::set("TIERCACHE_BYPASS_HEADER", None);
        let _status = EnvVarGuard::set("TIERCACHE_STATUS_HEADER", Some("x-cache"));

        let config = ResponseCacheConfig::from_env();
        assert_eq!(config.cache.name, "pages");
        assert_eq!(config.cache.stale_ttl, Some(Duration::from_millis(500)));
        assert_eq!(config.cache.expire_ttl, Some(Duration::from_secs(5)));
        assert!(config.cache.debug);
        assert_eq!(config.include_methods, vec!["GET".to_string(), "HEAD".to_string()]);
        assert_eq!(config.bypass_header, DEFAULT_BYPASS_HEADER);
        assert_eq!(config.status_header, "x-cache");

        let _stale = EnvVarGuard::set("TIERCACHE_STALE_TTL_SECS", Some("-1"));
        assert_eq!(ResponseCacheConfig::from_env().cache.stale_ttl, None);
    }

    #[test]
    fn test_validate_rejects_bad_header() {
        let config = ResponseCacheConfig::default().with_status_header("not a header");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "status_header"));
    }

    #[test]
    fn test_validate_rejects_empty_methods() {
        let config = ResponseCacheConfig::default().with_include_methods(Vec::<String>::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_checks_cache_config() {
        let config = ResponseCacheConfig::new(CacheConfig::new().with_name("a:b"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_parses_methods() {
        let config = ResponseCacheConfig::default().with_include_methods(["GET", "HEAD"]);
        let names = config.resolve().expect("resolve");
        assert_eq!(names.include_methods, vec![Method::GET, Method::HEAD]);
        assert_eq!(names.status_header.as_str(), "cache-status");
    }
}
