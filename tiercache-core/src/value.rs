//! Timed value envelope.
//!
//! A [`TimedValue`] wraps a payload with its creation instant and two optional
//! TTLs. The absolute "stale at" and "expire at" instants are derived from
//! `created + ttl` and are never stored, so a decoded envelope always agrees
//! with its own creation time.
//!
//! # Wire format
//!
//! ```json
//! { "value": <payload>, "created": "2024-01-01T00:00:00Z", "staleTTL": 0.5, "expireTTL": 5 }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Cache-Control directive used when nothing may be cached downstream.
pub const NO_CACHE_DIRECTIVE: &str = "no-cache, no-store, must-revalidate";

/// Where a value sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Neither stale nor expired; serve as-is.
    Fresh,
    /// Past its stale instant; serve and refresh in the background.
    Stale,
    /// Past its expire instant; never served again.
    Expired,
}

/// A payload with creation time and optional stale/expire TTLs.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedValue<T> {
    value: T,
    created: DateTime<Utc>,
    stale_ttl: Option<Duration>,
    stale_at: Option<DateTime<Utc>>,
    expire_ttl: Option<Duration>,
    expire_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    value: &'a T,
    created: DateTime<Utc>,
    #[serde(rename = "staleTTL")]
    stale_ttl: Option<f64>,
    #[serde(rename = "expireTTL")]
    expire_ttl: Option<f64>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    value: T,
    created: DateTime<Utc>,
    #[serde(rename = "staleTTL", default)]
    stale_ttl: Option<f64>,
    #[serde(rename = "expireTTL", default)]
    expire_ttl: Option<f64>,
}

/// `created + ttl`, or `None` when the sum leaves chrono's range.
///
/// An instant that cannot be represented is treated as "never".
fn offset(created: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(ttl).ok()?;
    created.checked_add_signed(delta)
}

/// Decode a TTL in seconds. Values too large for [`Duration`] saturate to
/// [`Duration::MAX`], which `offset` already treats as "never".
fn ttl_from_secs(field: &str, secs: Option<f64>) -> CacheResult<Option<Duration>> {
    match secs {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs >= 0.0 => {
            Ok(Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)))
        }
        Some(secs) => Err(CacheError::malformed(format!(
            "{field} {secs}: must be a finite, non-negative number of seconds"
        ))),
    }
}

impl<T> TimedValue<T> {
    /// Wrap `value`, created at `created`, with no TTLs.
    pub fn new(value: T, created: DateTime<Utc>) -> Self {
        Self {
            value,
            created,
            stale_ttl: None,
            stale_at: None,
            expire_ttl: None,
            expire_at: None,
        }
    }

    /// Builder form of [`set_stale_ttl`](Self::set_stale_ttl).
    pub fn with_stale_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.set_stale_ttl(ttl);
        self
    }

    /// Builder form of [`set_expire_ttl`](Self::set_expire_ttl).
    pub fn with_expire_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.set_expire_ttl(ttl);
        self
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn stale_ttl(&self) -> Option<Duration> {
        self.stale_ttl
    }

    pub fn stale_at(&self) -> Option<DateTime<Utc>> {
        self.stale_at
    }

    pub fn expire_ttl(&self) -> Option<Duration> {
        self.expire_ttl
    }

    pub fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }

    /// Set or clear the stale TTL, recomputing the stale instant.
    pub fn set_stale_ttl(&mut self, ttl: Option<Duration>) {
        self.stale_ttl = ttl;
        self.stale_at = ttl.and_then(|ttl| offset(self.created, ttl));
    }

    /// Set or clear the expire TTL, recomputing the expire instant.
    pub fn set_expire_ttl(&mut self, ttl: Option<Duration>) {
        self.expire_ttl = ttl;
        self.expire_at = ttl.and_then(|ttl| offset(self.created, ttl));
    }

    /// True once `now` has reached the expire instant. Never true without one.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| now >= at)
    }

    /// True once `now` has reached the stale instant. Never true without one.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.stale_at.is_some_and(|at| now >= at)
    }

    /// Expired wins over stale.
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        if self.is_expired(now) {
            Freshness::Expired
        } else if self.is_stale(now) {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Whole seconds until the value goes stale (or expires, when it never
    /// goes stale), floored at zero.
    pub fn max_age(&self, now: DateTime<Utc>) -> u64 {
        match self.stale_at.or(self.expire_at) {
            Some(end) => (end - now).num_seconds().max(0) as u64,
            None => 0,
        }
    }

    /// `Cache-Control` header value for downstream HTTP caches.
    pub fn cache_control(&self, now: DateTime<Utc>) -> String {
        match self.max_age(now) {
            0 => NO_CACHE_DIRECTIVE.to_string(),
            max_age => format!("public, max-age={}", max_age),
        }
    }

    /// Replace the payload, keeping the timing metadata.
    pub fn map<U, F>(self, f: F) -> TimedValue<U>
    where
        F: FnOnce(T) -> U,
    {
        TimedValue {
            value: f(self.value),
            created: self.created,
            stale_ttl: self.stale_ttl,
            stale_at: self.stale_at,
            expire_ttl: self.expire_ttl,
            expire_at: self.expire_at,
        }
    }
}

impl<T: Serialize> TimedValue<T> {
    /// Encode as a JSON envelope. Derived instants are not written.
    pub fn serialize(&self) -> CacheResult<String> {
        let envelope = EnvelopeRef {
            value: &self.value,
            created: self.created,
            stale_ttl: self.stale_ttl.map(|ttl| ttl.as_secs_f64()),
            expire_ttl: self.expire_ttl.map(|ttl| ttl.as_secs_f64()),
        };
        serde_json::to_string(&envelope).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }
}

impl<T: DeserializeOwned> TimedValue<T> {
    /// Decode a JSON envelope, recomputing the derived instants.
    ///
    /// Any parse failure, including a negative or non-finite TTL, is reported
    /// as [`CacheError::MalformedEnvelope`].
    pub fn deserialize(blob: &str) -> CacheResult<Self> {
        let envelope: Envelope<T> = serde_json::from_str(blob)
            .map_err(|e| CacheError::malformed(format!("unable to parse json: {}", e)))?;

        let stale_ttl = ttl_from_secs("staleTTL", envelope.stale_ttl)?;
        let expire_ttl = ttl_from_secs("expireTTL", envelope.expire_ttl)?;

        Ok(TimedValue::new(envelope.value, envelope.created)
            .with_stale_ttl(stale_ttl)
            .with_expire_ttl(expire_ttl))
    }
}

// =============================================================================
// TESTS
// =============================================================================


// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================
