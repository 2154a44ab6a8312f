//! Core ContextStore implementation

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ContextError;

/// A stored value together with the time it was last written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Current value
    pub value: Value,
    /// Time of the last write to this key
    pub updated_at: DateTime<Utc>,
}

/// Snapshot statistics for the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    /// Number of keys currently stored
    pub entry_count: usize,
    /// Time of the most recent write to any key (None if never written)
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, ContextEntry>,
    last_modified: Option<DateTime<Utc>>,
}

/// Shared key/value store with last-writer-wins semantics
///
/// All operations take `&self`; wrap the store in an `Arc` to share it
/// between the orchestrator and module handlers.
#[derive(Debug, Default)]
pub struct ContextStore {
    inner: RwLock<Inner>,
}

impl ContextStore {
    /// Create an empty store
    pub fn new() -> Self {
        debug!("ContextStore::new: called");
        Self::default()
    }

    // Writers never leave the map half-updated, so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate_key(key: &str) -> Result<(), ContextError> {
        if key.trim().is_empty() {
            return Err(ContextError::InvalidKey("key must not be empty".to_string()));
        }
        if key.len() > crate::MAX_KEY_LEN {
            return Err(ContextError::InvalidKey(format!(
                "key exceeds {} bytes",
                crate::MAX_KEY_LEN
            )));
        }
        Ok(())
    }

    /// Get the current value for a key
    pub fn get(&self, key: &str) -> Result<Value, ContextError> {
        debug!(%key, "ContextStore::get: called");
        self.entry(key).map(|entry| entry.value)
    }

    /// Get the value and last-write timestamp for a key
    pub fn entry(&self, key: &str) -> Result<ContextEntry, ContextError> {
        self.read()
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| ContextError::NotFound { key: key.to_string() })
    }

    /// Set a key, overwriting any previous value
    ///
    /// Returns the previous value if there was one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<Option<Value>, ContextError> {
        let key = key.into();
        debug!(%key, "ContextStore::set: called");
        Self::validate_key(&key)?;

        let now = Utc::now();
        let mut inner = self.write();
        let previous = inner.entries.insert(key, ContextEntry { value, updated_at: now });
        inner.last_modified = Some(now);
        Ok(previous.map(|entry| entry.value))
    }

    /// Atomically compute a new value for a key from its current value
    ///
    /// The closure sees `None` when the key is unset. The write lock is held
    /// for the duration of the closure, so keep it short.
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> Result<Value, ContextError>
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let key = key.into();
        debug!(%key, "ContextStore::update: called");
        Self::validate_key(&key)?;

        let now = Utc::now();
        let mut inner = self.write();
        let next = f(inner.entries.get(&key).map(|entry| &entry.value));
        inner.entries.insert(
            key,
            ContextEntry {
                value: next.clone(),
                updated_at: now,
            },
        );
        inner.last_modified = Some(now);
        Ok(next)
    }

    /// Remove a key, returning its value
    pub fn remove(&self, key: &str) -> Result<Value, ContextError> {
        debug!(%key, "ContextStore::remove: called");
        let mut inner = self.write();
        let entry = inner
            .entries
            .remove(key)
            .ok_or_else(|| ContextError::NotFound { key: key.to_string() })?;
        inner.last_modified = Some(Utc::now());
        Ok(entry.value)
    }

    /// Check whether a key is set
    pub fn contains(&self, key: &str) -> bool {
        self.read().entries.contains_key(key)
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys starting with `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .read()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Entry count and last write time
    pub fn stats(&self) -> ContextStats {
        let inner = self.read();
        ContextStats {
            entry_count: inner.entries.len(),
            last_modified: inner.last_modified,
        }
    }

    /// Copy of every entry, ordered by key
    pub fn snapshot(&self) -> BTreeMap<String, ContextEntry> {
        self.read()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
