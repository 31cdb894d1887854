//! Filesystem credential store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::{CredentialStore, StorageError, StorageResult, StoredObject};

/// Credential store writing one file per key under a root directory.
///
/// TTLs are tracked in-process only. That is enough in practice: records
/// carry their own `expires` timestamps and the periodic sweep prunes by
/// record content, so nothing depends on this map surviving a restart.
pub struct FileStore {
    root: PathBuf,
    expirations: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: PathBuf) -> StorageResult<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            expirations: RwLock::new(HashMap::new()),
        })
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.contains('\\')
            || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Remove the file behind `key` if its TTL has lapsed.
    /// Returns whether the key is now gone for that reason.
    async fn evict_if_expired(&self, key: &str) -> StorageResult<bool> {
        let lapsed = {
            let expirations = self.expirations.read().await;
            expirations.get(key).map(|at| Utc::now() > *at).unwrap_or(false)
        };
        if !lapsed {
            return Ok(false);
        }

        self.expirations.write().await.remove(key);
        match std::fs::remove_file(self.resolve(key)?) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.resolve(key)?;
        if self.evict_if_expired(key).await? {
            return Ok(None);
        }
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StorageResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, value)?;

        let mut expirations = self.expirations.write().await;
        match ttl_secs {
            Some(secs) => {
                expirations.insert(key.to_string(), Utc::now() + Duration::seconds(secs as i64));
            }
            None => {
                expirations.remove(key);
            }
        }
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.evict_if_expired(key).await?;

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(value.as_bytes())?;
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        self.expirations.write().await.remove(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<StoredObject>> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            let trimmed = prefix
                .strip_suffix('/')
                .ok_or_else(|| StorageError::InvalidKey(prefix.to_string()))?;
            self.resolve(trimmed)?
        };

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = format!("{}{}", prefix, name);
            if self.evict_if_expired(&key).await? {
                continue;
            }
            let uploaded_at = entry
                .metadata()?
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            objects.push(StoredObject { key, uploaded_at });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
