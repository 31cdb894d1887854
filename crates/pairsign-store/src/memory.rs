//! In-memory credential store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{CredentialStore, StorageResult, StoredObject};

struct Entry {
    value: String,
    uploaded_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: &str, ttl_secs: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            value: value.to_string(),
            uploaded_at: now,
            expires_at: ttl_secs.map(|secs| now + Duration::seconds(secs as i64)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() > at).unwrap_or(false)
    }
}

/// Credential store backed by a map. Used in tests and for ephemeral setups.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {}
            Some(entry) => return Ok(Some(entry.value.clone())),
            None => return Ok(None),
        }
        // Expired: evict so put_if_absent can claim the key again.
        entries.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry::new(value, ttl_secs));
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> StorageResult<bool> {
        let mut entries = self.entries.write().await;
        if matches!(entries.get(key), Some(entry) if !entry.is_expired()) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(value, None));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<StoredObject>> {
        let entries = self.entries.read().await;
        let mut objects: Vec<StoredObject> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .map(|(key, entry)| StoredObject {
                key: key.clone(),
                uploaded_at: entry.uploaded_at,
            })
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
