//! Credential storage backends for pairsign
//!
//! Users, clients, authorization codes, access tokens, and the signing key
//! are all stored as JSON strings under path-style keys (`users/alice.json`,
//! `codes/<code>.json`, ...). The [`CredentialStore`] trait abstracts over
//! where those strings live; [`FileStore`] keeps them on disk under the data
//! directory and [`MemoryStore`] keeps them in a map for tests.

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors from a credential store backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key contained path traversal or other disallowed parts
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for pairsign_core::Error {
    fn from(err: StorageError) -> Self {
        pairsign_core::Error::Storage(err.to_string())
    }
}

/// A stored object returned by [`CredentialStore::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Full key of the object, prefix included
    pub key: String,
    /// When the object was written
    pub uploaded_at: DateTime<Utc>,
}

/// Backend-agnostic credential storage.
///
/// Values are JSON strings; expiry is advisory. Records carry their own
/// `expires` timestamps and consumers check those, so a backend that forgets
/// a TTL (for example after a restart) still behaves correctly.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the value at `key`, if present and unexpired
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store `value` at `key`, optionally expiring after `ttl_secs` seconds
    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StorageResult<()>;

    /// Store `value` at `key` only if nothing lives there yet.
    ///
    /// Returns whether the write happened. Concurrent callers see exactly one
    /// `true`; the losers re-read the winner's value.
    async fn put_if_absent(&self, key: &str, value: &str) -> StorageResult<bool>;

    /// Remove the value at `key`; returns whether something was removed
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// List stored objects whose keys start with `prefix`, sorted by key.
    ///
    /// Backends may require `prefix` to be empty or end in `/`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<StoredObject>>;
}
