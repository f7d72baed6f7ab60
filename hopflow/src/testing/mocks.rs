//! In-process stand-ins for the gateway and for contended stores.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::{Operation, OperationKind};
use crate::errors::{InvocationError, StoreError};
use crate::store::{DataStore, StateStore};
use crate::transport::{FunctionInvoker, InvocationResponse};

type Handler = Arc<dyn Fn(&[u8]) -> InvocationResponse + Send + Sync>;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Function name or callback URL.
    pub target: String,
    /// The request body.
    pub input: Vec<u8>,
}

/// A function invoker answering from registered closures.
///
/// Unregistered targets echo their input with status 200.
#[derive(Clone, Default)]
pub struct MockInvoker {
    handlers: Arc<Mutex<HashMap<String, Handler>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockInvoker {
    /// Creates an invoker that echoes every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers calls to `target` with the output of `handler`.
    #[must_use]
    pub fn with_handler<F>(self, target: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.with_response(target, move |input| InvocationResponse::ok(handler(input)))
    }

    /// Answers calls to `target` with a full response.
    #[must_use]
    pub fn with_response<F>(self, target: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[u8]) -> InvocationResponse + Send + Sync + 'static,
    {
        self.handlers.lock().insert(target.into(), Arc::new(handler));
        self
    }

    /// Answers every call to `target` with `status` and `body`.
    #[must_use]
    pub fn with_status(self, target: impl Into<String>, status: u16, body: &str) -> Self {
        let body = body.as_bytes().to_vec();
        self.with_response(target, move |_| InvocationResponse::with_status(status, body.clone()))
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns how often `target` was called.
    #[must_use]
    pub fn call_count(&self, target: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.target == target).count()
    }
}

impl std::fmt::Debug for MockInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInvoker")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FunctionInvoker for MockInvoker {
    async fn invoke(
        &self,
        operation: &Operation,
        input: &[u8],
    ) -> Result<InvocationResponse, InvocationError> {
        let target = match operation.kind() {
            OperationKind::Function { name } => name.clone(),
            OperationKind::Callback { url } => url.clone(),
            OperationKind::Modifier { .. } => {
                return Err(InvocationError::Request {
                    url: "modifier".to_string(),
                    message: "modifiers are not invoked".to_string(),
                })
            }
        };
        self.calls.lock().push(RecordedCall {
            target: target.clone(),
            input: input.to_vec(),
        });
        let handler = self.handlers.lock().get(&target).cloned();
        Ok(handler.map_or_else(|| InvocationResponse::ok(input), |h| h(input)))
    }
}

/// A state store wrapper whose first `conflicts` updates of every key fail
/// with [`StoreError::Conflict`].
#[derive(Clone)]
pub struct ConflictingStateStore {
    inner: Arc<dyn StateStore>,
    conflicts: usize,
    seen: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl ConflictingStateStore {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn StateStore>, conflicts: usize) -> Self {
        Self {
            inner,
            conflicts,
            seen: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Returns the number of update attempts made for `key`.
    #[must_use]
    pub fn attempts(&self, key: &str) -> usize {
        self.seen.lock().get(key).copied().unwrap_or(0)
    }
}

impl std::fmt::Debug for ConflictingStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictingStateStore")
            .field("conflicts", &self.conflicts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StateStore for ConflictingStateStore {
    fn configure(&self, flow_name: &str, request_id: &str) -> Arc<dyn StateStore> {
        Arc::new(Self {
            inner: self.inner.configure(flow_name, request_id),
            conflicts: self.conflicts,
            seen: Arc::clone(&self.seen),
        })
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.inner.init().await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.inner.get(key).await
    }

    async fn update(&self, key: &str, old: &str, new: &str) -> Result<(), StoreError> {
        let attempt = {
            let mut seen = self.seen.lock();
            let count = seen.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt <= self.conflicts {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        self.inner.update(key, old, new).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        self.inner.cleanup().await
    }
}

/// One write seen by [`LoggingStateStore`] or [`LoggingDataStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    /// A data store `set`.
    Data {
        /// The data key.
        key: String,
    },
    /// A successful state store compare-and-swap.
    Swap {
        /// The state key.
        key: String,
        /// The value written.
        value: String,
    },
}

/// An ordered record of writes shared by the logging stores of all hops.
#[derive(Debug, Clone, Default)]
pub struct WriteLog {
    writes: Arc<Mutex<Vec<StoreWrite>>>,
}

impl WriteLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every write in the order it completed.
    #[must_use]
    pub fn writes(&self) -> Vec<StoreWrite> {
        self.writes.lock().clone()
    }

    /// For every swap of `counter`, returns the swapped value together with
    /// the number of data keys ending in `suffix` written before it.
    #[must_use]
    pub fn stored_before_swaps(&self, counter: &str, suffix: &str) -> Vec<(String, usize)> {
        let mut stored = 0;
        let mut swaps = Vec::new();
        for write in self.writes.lock().iter() {
            match write {
                StoreWrite::Data { key } if key.ends_with(suffix) => stored += 1,
                StoreWrite::Swap { key, value } if key == counter => {
                    swaps.push((value.clone(), stored));
                }
                _ => {}
            }
        }
        swaps
    }

    fn push(&self, write: StoreWrite) {
        self.writes.lock().push(write);
    }
}

/// A state store wrapper logging every successful `update`.
#[derive(Clone)]
pub struct LoggingStateStore {
    inner: Arc<dyn StateStore>,
    log: WriteLog,
}

impl LoggingStateStore {
    /// Wraps `inner`, appending to `log`.
    #[must_use]
    pub fn new(inner: Arc<dyn StateStore>, log: WriteLog) -> Self {
        Self { inner, log }
    }
}

impl std::fmt::Debug for LoggingStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingStateStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl StateStore for LoggingStateStore {
    fn configure(&self, flow_name: &str, request_id: &str) -> Arc<dyn StateStore> {
        Arc::new(Self::new(
            self.inner.configure(flow_name, request_id),
            self.log.clone(),
        ))
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.inner.init().await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.inner.get(key).await
    }

    async fn update(&self, key: &str, old: &str, new: &str) -> Result<(), StoreError> {
        self.inner.update(key, old, new).await?;
        self.log.push(StoreWrite::Swap {
            key: key.to_string(),
            value: new.to_string(),
        });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        self.inner.cleanup().await
    }
}

/// A data store wrapper logging every `set`.
#[derive(Clone)]
pub struct LoggingDataStore {
    inner: Arc<dyn DataStore>,
    log: WriteLog,
}

impl LoggingDataStore {
    /// Wraps `inner`, appending to `log`.
    #[must_use]
    pub fn new(inner: Arc<dyn DataStore>, log: WriteLog) -> Self {
        Self { inner, log }
    }
}

impl std::fmt::Debug for LoggingDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingDataStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl DataStore for LoggingDataStore {
    fn configure(&self, flow_name: &str, request_id: &str) -> Arc<dyn DataStore> {
        Arc::new(Self::new(
            self.inner.configure(flow_name, request_id),
            self.log.clone(),
        ))
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.inner.init().await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner.set(key, value).await?;
        self.log.push(StoreWrite::Data {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        self.inner.cleanup().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDataStore, MemoryStateStore};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_mock_invoker_routes_by_target() {
        let invoker = MockInvoker::new()
            .with_handler("double", |input| [input, input].concat())
            .with_status("broken", 503, "down");

        let resp = invoker.invoke(&Operation::function("double"), b"ab").await.unwrap();
        assert_eq!(resp.body, b"abab".to_vec());

        let resp = invoker.invoke(&Operation::function("broken"), b"").await.unwrap();
        assert_eq!(resp.status, 503);

        let resp = invoker
            .invoke(&Operation::callback("http://cb/x"), b"echo")
            .await
            .unwrap();
        assert_eq!(resp.body, b"echo".to_vec());

        assert_eq!(invoker.call_count("double"), 1);
        assert_eq!(invoker.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_write_log_counts_data_stored_before_each_swap() {
        let log = WriteLog::new();
        let state = LoggingStateStore::new(Arc::new(MemoryStateStore::new()), log.clone())
            .configure("flow", "req");
        let data = LoggingDataStore::new(Arc::new(MemoryDataStore::new()), log.clone())
            .configure("flow", "req");

        state.set("J-join-completion", "0").await.unwrap();
        data.set("A--J", b"a").await.unwrap();
        state.update("J-join-completion", "0", "1").await.unwrap();
        assert!(state.update("J-join-completion", "0", "1").await.is_err());
        data.set("B--J", b"b").await.unwrap();
        data.set("other", b"x").await.unwrap();
        state.update("J-join-completion", "1", "2").await.unwrap();

        assert_eq!(
            log.stored_before_swaps("J-join-completion", "--J"),
            vec![("1".to_string(), 1), ("2".to_string(), 2)]
        );
        assert_eq!(log.writes().len(), 5);
    }

    #[tokio::test]
    async fn test_conflicting_store_fails_first_updates() {
        let store = ConflictingStateStore::new(Arc::new(MemoryStateStore::new()), 2);
        let scoped = store.configure("flow", "req");
        scoped.set("k", "0").await.unwrap();

        assert!(matches!(
            scoped.update("k", "0", "1").await,
            Err(StoreError::Conflict { .. })
        ));
        assert!(scoped.update("k", "0", "1").await.is_err());
        scoped.update("k", "0", "1").await.unwrap();
        assert_eq!(scoped.get("k").await.unwrap(), "1");
        assert_eq!(store.attempts("k"), 3);
    }
}
