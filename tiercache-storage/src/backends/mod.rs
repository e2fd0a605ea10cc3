//! Concrete storage backends.

pub mod error;
pub mod lmdb;
pub mod lru;
pub mod memory;
pub mod noop;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::error::ErrorBackend;
pub use self::lmdb::{LmdbBackend, LmdbBackendError};
pub use self::lru::LruMemoryBackend;
pub use self::memory::MemoryBackend;
pub use self::noop::NoopBackend;
#[cfg(feature = "redis")]
pub use self::redis::{RedisBackend, RedisBackendError};
