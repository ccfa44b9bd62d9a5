//! Shared key-value store backing the module registry.
//!
//! The registry only needs per-key atomic get/set. Swapping the in-memory
//! implementation for a networked one is enough for multi-process use.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Key-value store with per-key atomic reads and writes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Set `key` only if it is absent. Returns true if the value was written.
    async fn set_if_absent(&self, key: &str, value: String) -> Result<bool>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String) -> Result<bool> {
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "1".to_string()).await.unwrap());
        assert!(!store.set_if_absent("k", "2".to_string()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
    }
}
