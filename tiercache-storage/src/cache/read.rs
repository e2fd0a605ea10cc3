//! Result of a wrapped read, carrying cache metadata.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tiercache_core::{CacheError, CacheResult, TimedValue};

/// Which branch of the stale-while-revalidate state machine produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Stored value was fresh.
    Fresh,
    /// Stored value was stale; served while a background refresh runs.
    Stale,
    /// Stored value had expired; refreshed synchronously.
    Expired,
    /// Nothing usable was stored; refreshed synchronously.
    Miss,
}

impl ReadOutcome {
    /// True when the value came from a backend rather than the producer.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Fresh | Self::Stale)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Expired => "expired",
            Self::Miss => "miss",
        }
    }
}

/// Side-channel record attached to reads in debug mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    pub key: String,
    pub created: DateTime<Utc>,
    #[serde(rename = "staleTTL")]
    pub stale_ttl: Option<f64>,
    pub stale_at: Option<DateTime<Utc>>,
    #[serde(rename = "expireTTL")]
    pub expire_ttl: Option<f64>,
    pub expire_at: Option<DateTime<Utc>>,
}

impl CacheMeta {
    fn describe<T>(key: &str, value: &TimedValue<T>) -> Self {
        Self {
            key: key.to_string(),
            created: value.created(),
            stale_ttl: value.stale_ttl().map(|ttl| ttl.as_secs_f64()),
            stale_at: value.stale_at(),
            expire_ttl: value.expire_ttl().map(|ttl| ttl.as_secs_f64()),
            expire_at: value.expire_at(),
        }
    }
}

/// A value returned by `wrap_read`.
///
/// The payload is never altered. Debug metadata, when enabled, lives next to
/// it and is only merged into a JSON view by [`annotated`](Self::annotated).
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    key: String,
    timed: TimedValue<T>,
    outcome: ReadOutcome,
    meta: Option<CacheMeta>,
}

impl<T> CacheRead<T> {
    pub(crate) fn new(key: String, timed: TimedValue<T>, outcome: ReadOutcome, debug: bool) -> Self {
        let meta = debug.then(|| CacheMeta::describe(&key, &timed));
        Self {
            key,
            timed,
            outcome,
            meta,
        }
    }

    pub fn value(&self) -> &T {
        self.timed.get()
    }

    pub fn into_value(self) -> T {
        self.timed.into_value()
    }

    /// The storage key the value was read from or written to.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn outcome(&self) -> ReadOutcome {
        self.outcome
    }

    /// The envelope as stored, including its TTLs.
    pub fn timed(&self) -> &TimedValue<T> {
        &self.timed
    }

    pub fn into_timed(self) -> TimedValue<T> {
        self.timed
    }

    /// Debug metadata; `None` unless the orchestrator runs in debug mode.
    pub fn meta(&self) -> Option<&CacheMeta> {
        self.meta.as_ref()
    }
}

impl<T: Serialize> CacheRead<T> {
    /// JSON view of the payload with debug metadata merged under `_cache`.
    ///
    /// Only object payloads are annotated; anything else, or any read
    /// without metadata, is returned as plain JSON.
    pub fn annotated(&self) -> CacheResult<Value> {
        let mut json = serde_json::to_value(self.timed.get()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;

        if let (Some(meta), Value::Object(map)) = (&self.meta, &mut json) {
            let meta = serde_json::to_value(meta).map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
            map.insert("_cache".to_string(), meta);
        }

        Ok(json)
    }
}
