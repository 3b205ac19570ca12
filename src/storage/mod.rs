//! Durable key-value storage used to persist sessions
//!
//! Writes and removals take a batch of keys so that a backend can apply them
//! as one unit; both implementations here do.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StorageError;

/// Synchronous key-value storage. Missing keys are not an error.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write every entry, or none of them
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError>;

    /// Remove every key; absent keys are skipped
    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory store, for tests and short-lived processes
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut map = lock(&self.entries);
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = lock(&self.entries);
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// Store backed by a single JSON file.
///
/// Every mutation rewrites the whole file through a temporary sibling and a
/// rename, so readers never observe a half-written batch.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(map)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = lock(&self.guard);
        Ok(self.read_map()?.remove(key))
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.read_map()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        self.write_map(&map)
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.read_map()?;
        let before = map.len();
        for key in keys {
            map.remove(*key);
        }
        if map.len() == before {
            return Ok(());
        }
        self.write_map(&map)
    }
}
