//! tiercache core types
//!
//! Pure data structures shared by the storage and HTTP layers: the timed
//! value envelope, the injectable clock, key derivation, configuration and
//! the error taxonomy. No I/O happens here.

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheOptions, DEFAULT_NAME};
pub use error::{BackendError, BoxError, CacheError, CacheResult, ConfigError};
pub use key::{derive_key, hash_hex, KEY_INFIX};
pub use value::{Freshness, TimedValue, NO_CACHE_DIRECTIVE};
