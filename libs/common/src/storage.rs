//! Persisted key/value storage for client credentials
//!
//! This module provides a small synchronous string store with the same
//! contract as browser local storage: every `get`, `set` and `remove` is a
//! whole-value operation, so interleaved callers never observe a partially
//! written slot.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Synchronous string-keyed store
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Set a key-value pair, replacing any previous value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Process-local store, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Store mirrored to a JSON object on disk
///
/// The whole map is rewritten after every mutation through a temporary file
/// renamed into place, so the file on disk is always a complete map. A file
/// that does not parse is discarded and the store starts empty.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, loading existing content if the file exists
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                match serde_json::from_str(&raw) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!("Discarding unreadable store at {}: {}", path.display(), e);
                        fs::remove_file(&path)?;
                        HashMap::new()
                    }
                }
            }
        } else {
            HashMap::new()
        };

        info!("File store opened at {} ({} keys)", path.display(), entries.len());

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn flush(&self, entries: &HashMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        debug!("File store flushed to {}", self.path.display());
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}
