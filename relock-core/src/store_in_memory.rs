use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::{KeyValueStore, StoreError};

/// In-process store backend. A single mutex around the map makes each
/// primitive atomic with respect to concurrent handles; useful for
/// cross-thread coordination and as the test backend.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still structurally sound; keep serving it.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for InMemoryStore {
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut entries = self.lock_entries();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock_entries().get(key).cloned())
    }

    fn get_and_replace(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock_entries()
            .insert(key.to_string(), value.to_string()))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock_entries().remove(key).is_some())
    }
}
