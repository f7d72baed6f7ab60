//! Process-local stores shared by every hop of the process.
//!
//! The backing map is shared by all handles cloned from the same store, so
//! several executors (one per simulated process in tests, or one per worker
//! in a single-process deployment) coordinate through it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::{DataStore, StateStore};
use crate::errors::StoreError;

/// A namespaced view on a shared concurrent map.
#[derive(Debug, Clone)]
struct Scoped<V> {
    entries: Arc<DashMap<String, V>>,
    scope: Option<String>,
}

impl<V> Default for Scoped<V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            scope: None,
        }
    }
}

impl<V: Clone> Scoped<V> {
    fn configured(&self, flow_name: &str, request_id: &str) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            scope: Some(format!("{flow_name}/{request_id}/")),
        }
    }

    fn key(&self, key: &str) -> Result<String, StoreError> {
        self.scope
            .as_ref()
            .map(|scope| format!("{scope}{key}"))
            .ok_or(StoreError::NotConfigured)
    }

    fn set(&self, key: &str, value: V) -> Result<(), StoreError> {
        self.entries.insert(self.key(key)?, value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<V, StoreError> {
        self.entries
            .get(&self.key(key)?)
            .map(|v| v.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(&self.key(key)?);
        Ok(())
    }

    fn cleanup(&self) -> Result<(), StoreError> {
        let scope = self.scope.as_ref().ok_or(StoreError::NotConfigured)?;
        self.entries.retain(|k, _| !k.starts_with(scope.as_str()));
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// In-memory state store with compare-and-swap updates.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Scoped<String>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries across all requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no request holds any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn configure(&self, flow_name: &str, request_id: &str) -> Arc<dyn StateStore> {
        Arc::new(Self {
            inner: self.inner.configured(flow_name, request_id),
        })
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.inner.key("").map(|_| ())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value.to_string())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.inner.get(key)
    }

    async fn update(&self, key: &str, old: &str, new: &str) -> Result<(), StoreError> {
        let full = self.inner.key(key)?;
        let mut entry = self
            .inner
            .entries
            .get_mut(&full)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if entry.value() != old {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        *entry.value_mut() = new.to_string();
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key)
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        self.inner.cleanup()
    }
}

/// In-memory data store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataStore {
    inner: Scoped<Vec<u8>>,
}

impl MemoryDataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries across all requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no request holds any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    fn configure(&self, flow_name: &str, request_id: &str) -> Arc<dyn DataStore> {
        Arc::new(Self {
            inner: self.inner.configured(flow_name, request_id),
        })
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.inner.key("").map(|_| ())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner.set(key, value.to_vec())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key)
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        self.inner.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_store_is_rejected() {
        let store = MemoryStateStore::new();
        assert_eq!(store.set("k", "v").await, Err(StoreError::NotConfigured));
        assert_eq!(store.init().await, Err(StoreError::NotConfigured));
    }

    #[tokio::test]
    async fn test_set_get_del() {
        let store = MemoryStateStore::new().configure("flow", "r1");
        store.init().await.unwrap();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), "v");

        store.del("k").await.unwrap();
        assert!(store.get("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStateStore::new().configure("flow", "r1");
        store.set("counter", "0").await.unwrap();

        store.update("counter", "0", "1").await.unwrap();
        assert_eq!(
            store.update("counter", "0", "1").await,
            Err(StoreError::Conflict {
                key: "counter".to_string()
            })
        );
        assert_eq!(store.get("counter").await.unwrap(), "1");
        assert!(store.update("missing", "0", "1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_requests_are_isolated_and_cleaned_up() {
        let shared = MemoryDataStore::new();
        let r1 = shared.configure("flow", "r1");
        let r2 = shared.configure("flow", "r2");

        r1.set("A--B", b"one").await.unwrap();
        r2.set("A--B", b"two").await.unwrap();
        assert_eq!(r1.get("A--B").await.unwrap(), b"one".to_vec());
        assert_eq!(shared.len(), 2);

        r1.cleanup().await.unwrap();
        assert!(r1.get("A--B").await.is_err());
        assert_eq!(r2.get("A--B").await.unwrap(), b"two".to_vec());
        assert_eq!(shared.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_only_one_wins() {
        let store = MemoryStateStore::new().configure("flow", "r1");
        store.set("c", "0").await.unwrap();

        let attempts = (0..8).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.update("c", "0", "1").await })
        });
        let results = futures::future::join_all(attempts).await;
        let wins = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(()))))
            .count();
        assert_eq!(wins, 1);
    }
}
