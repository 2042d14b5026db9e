//! Key-value persistence backend trait and implementations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::fs;
use uuid::Uuid;

use relato_common::{Error, Result};

/// Persistence backend for the queue store and read cache.
///
/// Each key maps to a single serialized document. Writes are full-value
/// replacements; a failed write must never leave a partially written value
/// behind.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Get the backend name (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// Read the value stored under `key`, if any.
    ///
    /// # Errors
    /// - I/O errors other than absence
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`.
    ///
    /// # Postconditions
    /// - On success the full new value is durable
    /// - On failure the previous value is still intact
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`. Idempotent.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Filesystem backend storing one JSON document per key.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Create a new file backend rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        // Write to a sibling temp file, then rename over the old value so a
        // failed write never clobbers the previous document.
        let tmp = self.root.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));
        fs::write(&tmp, value).await.map_err(Error::Io)?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Io(e));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// In-memory backend.
///
/// Useful for testing and for degraded operation when no durable storage is
/// available. All data is lost on drop.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Create a new empty memory backend.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }
}
