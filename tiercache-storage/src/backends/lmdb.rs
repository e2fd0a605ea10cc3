//! LMDB-backed persistent backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep serialized envelopes
//! in a memory-mapped file that survives restarts. Keys and values are
//! stored as UTF-8 strings in a single unnamed database.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`
//! - Write transactions for `set`
//!
//! LMDB never evicts; size the map for the working set.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use tiercache_core::BackendError;

use crate::cache::StorageBackend;

const NAME: &str = "LmdbBackend";

/// Error type for LMDB backend operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbBackendError> for BackendError {
    fn from(e: LmdbBackendError) -> Self {
        match e {
            LmdbBackendError::Io(io) => BackendError::Io {
                backend: NAME.to_string(),
                reason: io.to_string(),
            },
            other => BackendError::unavailable(NAME, other.to_string()),
        }
    }
}

fn transaction(e: heed::Error) -> LmdbBackendError {
    LmdbBackendError::Transaction(e.to_string())
}

/// Persistent backend over an LMDB environment.
pub struct LmdbBackend {
    env: Env,
    db: Database<Str, Str>,
}

impl std::fmt::Debug for LmdbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbBackend")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbBackend {
    /// Open (or create) an LMDB backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or the
    /// environment or database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbBackendError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(transaction)?;
        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(transaction)?;

        Ok(Self { env, db })
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<u64, LmdbBackendError> {
        let rtxn = self.env.read_txn().map_err(transaction)?;
        self.db.len(&rtxn).map_err(transaction)
    }

    pub fn is_empty(&self) -> Result<bool, LmdbBackendError> {
        Ok(self.len()? == 0)
    }

    fn read(&self, key: &str) -> Result<Option<String>, LmdbBackendError> {
        let rtxn = self.env.read_txn().map_err(transaction)?;
        let value = self.db.get(&rtxn, key).map_err(transaction)?;
        Ok(value.map(str::to_string))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), LmdbBackendError> {
        let mut wtxn = self.env.write_txn().map_err(transaction)?;
        self.db.put(&mut wtxn, key, value).map_err(transaction)?;
        wtxn.commit().map_err(transaction)
    }
}

#[async_trait]
impl StorageBackend for LmdbBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn get(&self, key: &str) -> Result<String, BackendError> {
        self.read(key)?.ok_or_else(|| BackendError::not_found(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<String, BackendError> {
        self.write(key, &value)?;
        Ok(value)
    }
}
