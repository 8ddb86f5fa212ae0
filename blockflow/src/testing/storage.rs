//! In-memory block storage.

use crate::plugins::BlockStorage;
use async_trait::async_trait;
use dashmap::DashMap;

/// A [`BlockStorage`] backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: DashMap<String, serde_json::Value>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl BlockStorage for InMemoryStorage {
    async fn try_get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    async fn set(&self, key: &str, value: serde_json::Value) {
        self.entries.insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_remove() {
        let storage = InMemoryStorage::new();
        storage.set("a", json!(1)).await;
        storage.set("b", json!({"x": true})).await;

        assert_eq!(storage.try_get("a").await, Some(json!(1)));
        assert_eq!(storage.len(), 2);
        assert!(storage.remove("a").await);
        assert!(!storage.remove("a").await);
        assert_eq!(storage.try_get("a").await, None);
    }

    #[tokio::test]
    async fn test_clear() {
        let storage = InMemoryStorage::new();
        storage.set("a", json!(1)).await;
        storage.clear().await;
        assert!(storage.is_empty());
    }
}
