//! Redis backend over a multiplexed async connection.
//!
//! With compression enabled, values are zstd-compressed and stored under
//! `"{key}-zst"` so compressed and plain entries never collide.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tiercache_core::BackendError;

use crate::cache::StorageBackend;

const NAME: &str = "RedisBackend";

/// Suffix appended to keys whose values are compressed.
pub const COMPRESSED_KEY_SUFFIX: &str = "zst";

/// Default zstd level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum RedisBackendError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Stored value is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<RedisBackendError> for BackendError {
    fn from(e: RedisBackendError) -> Self {
        match e {
            RedisBackendError::Redis(e) => BackendError::unavailable(NAME, e.to_string()),
            other => BackendError::Codec {
                backend: NAME.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Remote backend.
#[derive(Clone)]
pub struct RedisBackend {
    connection: MultiplexedConnection,
    compression_level: Option<i32>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

impl RedisBackend {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`). Compression is off.
    pub async fn connect(url: &str) -> Result<Self, RedisBackendError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            compression_level: None,
        }
    }

    /// Store values zstd-compressed at `level`.
    pub fn with_compression(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.compression_level.is_some()
    }

    fn compressed_key(key: &str) -> String {
        format!("{}-{}", key, COMPRESSED_KEY_SUFFIX)
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, RedisBackendError> {
        let mut conn = self.connection.clone();
        if self.is_compressed() {
            let raw: Option<Vec<u8>> = conn.get(Self::compressed_key(key)).await?;
            raw.map(|bytes| decompress(&bytes)).transpose()
        } else {
            Ok(conn.get(key).await?)
        }
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), RedisBackendError> {
        let mut conn = self.connection.clone();
        match self.compression_level {
            Some(level) => {
                let bytes = compress(value, level)?;
                conn.set::<_, _, ()>(Self::compressed_key(key), bytes).await?;
            }
            None => {
                conn.set::<_, _, ()>(key, value).await?;
            }
        }
        Ok(())
    }
}

/// zstd-compress a UTF-8 value.
pub fn compress(value: &str, level: i32) -> Result<Vec<u8>, RedisBackendError> {
    Ok(zstd::encode_all(value.as_bytes(), level)?)
}

/// Reverse of [`compress`].
pub fn decompress(bytes: &[u8]) -> Result<String, RedisBackendError> {
    let raw = zstd::decode_all(bytes)?;
    Ok(String::from_utf8(raw)?)
}

#[async_trait]
impl StorageBackend for RedisBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn get(&self, key: &str) -> Result<String, BackendError> {
        self.fetch(key)
            .await?
            .ok_or_else(|| BackendError::not_found(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<String, BackendError> {
        self.store(key, &value).await?;
        Ok(value)
    }
}
