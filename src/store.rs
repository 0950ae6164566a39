//! The applied state store.
//!
//! A plain `String -> String` map mutated only by folding committed log
//! entries over it in index order (see [`crate::consensus::log`]). Every
//! mutating operation has a `validate_*` counterpart that a leader can use
//! to reject an obviously-bad client request before it ever consumes a log
//! slot; the precheck is advisory only; the authoritative outcome is
//! whatever the mutating call produces when the entry is actually applied.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::StoreError;

/// Thread-safe keyed value store applied to by committed log entries.
#[derive(Debug, Default)]
pub struct Store {
    data: RwLock<HashMap<String, String>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `value` at `key`. Fails if `key` already exists.
    pub fn create(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if data.contains_key(key) {
            return Err(StoreError::KeyExists(key.to_string()));
        }
        data.insert(key.to_string(), value);
        Ok(())
    }

    /// Check whether `create` would currently succeed, without mutating.
    pub fn validate_create(&self, key: &str) -> Result<(), StoreError> {
        if self.data.read().contains_key(key) {
            return Err(StoreError::KeyExists(key.to_string()));
        }
        Ok(())
    }

    /// Overwrite the value at `key`. Fails if `key` is absent.
    pub fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if !data.contains_key(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        data.insert(key.to_string(), value);
        Ok(())
    }

    /// Check whether `set` would currently succeed, without mutating.
    pub fn validate_set(&self, key: &str) -> Result<(), StoreError> {
        if !self.data.read().contains_key(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    /// Overwrite the value at `key` iff its current value equals `expected`.
    pub fn cas(&self, key: &str, expected: &str, value: String) -> Result<(), StoreError> {
        let mut data = self.data.write();
        match data.get(key) {
            None => Err(StoreError::KeyNotFound(key.to_string())),
            Some(current) if current != expected => {
                Err(StoreError::CompareMismatch(key.to_string()))
            }
            Some(_) => {
                data.insert(key.to_string(), value);
                Ok(())
            }
        }
    }

    /// Check whether `cas(key, expected, _)` would currently succeed.
    pub fn validate_cas(&self, key: &str, expected: &str) -> Result<(), StoreError> {
        match self.data.read().get(key) {
            None => Err(StoreError::KeyNotFound(key.to_string())),
            Some(current) if current != expected => {
                Err(StoreError::CompareMismatch(key.to_string()))
            }
            Some(_) => Ok(()),
        }
    }

    /// Remove `key`. Fails if `key` is absent.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if data.remove(key).is_none() {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    /// Check whether `delete` would currently succeed, without mutating.
    pub fn validate_delete(&self, key: &str) -> Result<(), StoreError> {
        if !self.data.read().contains_key(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    /// Read the value at `key`. Fails if `key` is absent.
    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    /// Check whether `get` would currently succeed, without mutating.
    pub fn validate_get(&self, key: &str) -> Result<(), StoreError> {
        if !self.data.read().contains_key(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    /// Number of keys currently stored. Exposed for tests and metrics.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store currently holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}
