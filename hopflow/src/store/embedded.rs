//! Stores that travel inside the continuation.
//!
//! Each hop gets a fresh, empty store that is filled from the incoming
//! continuation's snapshot and exported into every outgoing one. Nothing is
//! shared between hops that run concurrently, so these stores cannot back a
//! fan-in; they suit linear pipelines with small payloads.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{DataStore, StateStore};
use crate::errors::StoreError;

/// State store embedded in the continuation.
#[derive(Debug, Default)]
pub struct EmbeddedStateStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl EmbeddedStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for EmbeddedStateStore {
    fn configure(&self, _flow_name: &str, _request_id: &str) -> Arc<dyn StateStore> {
        Arc::new(Self::new())
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn update(&self, key: &str, old: &str, new: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let current = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if *current != old {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        *current = new.to_string();
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }

    fn export(&self) -> Option<BTreeMap<String, String>> {
        Some(self.entries.lock().clone())
    }

    fn import(&self, snapshot: BTreeMap<String, String>) -> Result<(), StoreError> {
        *self.entries.lock() = snapshot;
        Ok(())
    }
}

/// Data store embedded in the continuation; values travel base64-encoded.
#[derive(Debug, Default)]
pub struct EmbeddedDataStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl EmbeddedDataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for EmbeddedDataStore {
    fn configure(&self, _flow_name: &str, _request_id: &str) -> Arc<dyn DataStore> {
        Arc::new(Self::new())
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }

    fn export(&self) -> Option<BTreeMap<String, String>> {
        Some(
            self.entries
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
                .collect(),
        )
    }

    fn import(&self, snapshot: BTreeMap<String, String>) -> Result<(), StoreError> {
        let mut decoded = BTreeMap::new();
        for (key, value) in snapshot {
            let bytes = STANDARD
                .decode(value)
                .map_err(|e| StoreError::Backend(format!("invalid snapshot value for '{key}': {e}")))?;
            decoded.insert(key, bytes);
        }
        *self.entries.lock() = decoded;
        Ok(())
    }
}
