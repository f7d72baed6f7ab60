//! State and data store contracts.
//!
//! Stores are configured once per request: [`StateStore::configure`] and
//! [`DataStore::configure`] return a handle whose keys are namespaced by
//! flow name and request id. The state store holds small string values
//! (counters, branch options, request state) and supports compare-and-swap;
//! the data store holds intermediate payloads.
//!
//! Stores that travel inside the continuation expose their contents through
//! `export` / `import`; external stores keep the defaults.

mod embedded;
mod memory;

pub use embedded::{EmbeddedDataStore, EmbeddedStateStore};
pub use memory::{MemoryDataStore, MemoryStateStore};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::StoreError;

const STATE_PREFIX: &str = "state:";
const DATA_PREFIX: &str = "data:";

/// Key-value storage for intermediate payloads.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Returns a handle scoped to one request.
    fn configure(&self, flow_name: &str, request_id: &str) -> Arc<dyn DataStore>;

    /// Prepares the store for a new request.
    async fn init(&self) -> Result<(), StoreError>;

    /// Stores a value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Reads a value; a missing key is [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Deletes a value.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Removes everything stored for the request.
    async fn cleanup(&self) -> Result<(), StoreError>;

    /// Returns the contents when the store travels with the continuation.
    fn export(&self) -> Option<BTreeMap<String, String>> {
        None
    }

    /// Loads contents exported by a previous hop.
    fn import(&self, _snapshot: BTreeMap<String, String>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Key-value storage for coordination state with compare-and-swap.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns a handle scoped to one request.
    fn configure(&self, flow_name: &str, request_id: &str) -> Arc<dyn StateStore>;

    /// Prepares the store for a new request.
    async fn init(&self) -> Result<(), StoreError>;

    /// Stores a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Reads a value; a missing key is [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Replaces `old` with `new`; fails with [`StoreError::Conflict`] when
    /// the current value differs from `old`.
    async fn update(&self, key: &str, old: &str, new: &str) -> Result<(), StoreError>;

    /// Deletes a value.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Removes everything stored for the request.
    async fn cleanup(&self) -> Result<(), StoreError>;

    /// Returns the contents when the store travels with the continuation.
    fn export(&self) -> Option<BTreeMap<String, String>> {
        None
    }

    /// Loads contents exported by a previous hop.
    fn import(&self, _snapshot: BTreeMap<String, String>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Merges the exported contents of both stores into one flat snapshot.
#[must_use]
pub fn snapshot(state: &dyn StateStore, data: &dyn DataStore) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for (prefix, entries) in [(STATE_PREFIX, state.export()), (DATA_PREFIX, data.export())] {
        for (key, value) in entries.into_iter().flatten() {
            merged.insert(format!("{prefix}{key}"), value);
        }
    }
    merged
}

/// Splits a snapshot produced by [`snapshot`] back into both stores.
pub fn restore(
    snapshot: &BTreeMap<String, String>,
    state: &dyn StateStore,
    data: &dyn DataStore,
) -> Result<(), StoreError> {
    let mut state_entries = BTreeMap::new();
    let mut data_entries = BTreeMap::new();
    for (key, value) in snapshot {
        if let Some(key) = key.strip_prefix(STATE_PREFIX) {
            state_entries.insert(key.to_string(), value.clone());
        } else if let Some(key) = key.strip_prefix(DATA_PREFIX) {
            data_entries.insert(key.to_string(), value.clone());
        } else {
            return Err(StoreError::Backend(format!("unknown snapshot entry '{key}'")));
        }
    }
    state.import(state_entries)?;
    data.import(data_entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_snapshot_round_trip_through_embedded_stores() {
        let state = EmbeddedStateStore::new().configure("flow", "req");
        let data = EmbeddedDataStore::new().configure("flow", "req");
        state.set("A-join-completion", "1").await.unwrap();
        data.set("A--B", b"\x01\x02").await.unwrap();

        let snap = snapshot(state.as_ref(), data.as_ref());
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("state:A-join-completion").unwrap(), "1");

        let state2 = EmbeddedStateStore::new().configure("flow", "req");
        let data2 = EmbeddedDataStore::new().configure("flow", "req");
        restore(&snap, state2.as_ref(), data2.as_ref()).unwrap();

        assert_eq!(state2.get("A-join-completion").await.unwrap(), "1");
        assert_eq!(data2.get("A--B").await.unwrap(), vec![1, 2]);
        assert_eq!(snapshot(state2.as_ref(), data2.as_ref()), snap);
    }

    #[tokio::test]
    async fn test_external_stores_export_nothing() {
        let state = MemoryStateStore::new().configure("flow", "req");
        let data = MemoryDataStore::new().configure("flow", "req");
        state.set("k", "v").await.unwrap();
        assert!(snapshot(state.as_ref(), data.as_ref()).is_empty());
    }

    #[test]
    fn test_restore_rejects_unknown_entries() {
        let mut snap = BTreeMap::new();
        snap.insert("other:k".to_string(), "v".to_string());
        let state = EmbeddedStateStore::new();
        let data = EmbeddedDataStore::new();
        assert!(matches!(
            restore(&snap, &state, &data),
            Err(StoreError::Backend(_))
        ));
    }
}
