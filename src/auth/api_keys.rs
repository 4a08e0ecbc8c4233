//! In-memory API-key allowlist.
//!
//! Read on every authenticated request, written only by management calls, so
//! a multiple-reader/single-writer lock fits the access pattern.

use std::collections::HashSet;
use std::sync::RwLock;
use tracing::info;

/// Allowlist of accepted API keys
#[derive(Debug, Default)]
pub struct ApiKeyStore {
    keys: RwLock<HashSet<String>>,
}

impl ApiKeyStore {
    /// Build a store seeded from configuration
    pub fn new<I>(seed: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            keys: RwLock::new(seed.into_iter().collect()),
        }
    }

    /// Check a presented key against the allowlist
    pub fn contains(&self, key: &str) -> bool {
        self.keys.read().expect("api key lock poisoned").contains(key)
    }

    /// Add a key at runtime
    pub fn insert(&self, key: String) {
        let mut keys = self.keys.write().expect("api key lock poisoned");
        if keys.insert(key) {
            info!("API key added");
        }
    }

    /// Revoke a key at runtime
    pub fn remove(&self, key: &str) -> bool {
        let removed = self
            .keys
            .write()
            .expect("api key lock poisoned")
            .remove(key);
        if removed {
            info!("API key removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.keys.read().expect("api key lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_keys_are_accepted() {
        let store = ApiKeyStore::new(vec!["greenhouse-key-1".to_string()]);
        assert!(store.contains("greenhouse-key-1"));
        assert!(!store.contains("unknown-key"));
    }

    #[test]
    fn test_runtime_insert_and_remove() {
        let store = ApiKeyStore::new(Vec::new());
        assert!(store.is_empty());

        store.insert("dashboard-key".to_string());
        assert!(store.contains("dashboard-key"));
        assert_eq!(store.len(), 1);

        assert!(store.remove("dashboard-key"));
        assert!(!store.contains("dashboard-key"));
        assert!(!store.remove("dashboard-key"));
    }
}
