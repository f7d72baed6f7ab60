//! Runs a whole request in-process by looping continuations back.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::MockInvoker;
use crate::context::{Continuation, RawRequest};
use crate::errors::{FlowError, TransportError};
use crate::events::CollectingEventSink;
use crate::executor::{ExecutionOutcome, ExecutorConfig, FlowExecutor};
use crate::pipeline::{FlowDefinition, RetryConfig};
use crate::store::{DataStore, MemoryDataStore, MemoryStateStore, StateStore};
use crate::transport::{ContinuationTransport, FunctionInvoker};

const MAX_HOPS: usize = 10_000;

/// A transport that queues continuations instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    queue: Arc<Mutex<VecDeque<(String, Continuation)>>>,
}

impl LoopbackTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued continuations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Takes the oldest continuation.
    pub fn pop_front(&self) -> Option<Continuation> {
        self.queue.lock().pop_front().map(|(_, c)| c)
    }

    /// Takes the newest continuation.
    pub fn pop_back(&self) -> Option<Continuation> {
        self.queue.lock().pop_back().map(|(_, c)| c)
    }

    /// Takes everything queued.
    pub fn take_all(&self) -> Vec<Continuation> {
        self.queue.lock().drain(..).map(|(_, c)| c).collect()
    }

    /// Returns copies of the queued continuations.
    #[must_use]
    pub fn queued(&self) -> Vec<Continuation> {
        self.queue.lock().iter().map(|(_, c)| c.clone()).collect()
    }
}

#[async_trait]
impl ContinuationTransport for LoopbackTransport {
    async fn forward(&self, flow_name: &str, continuation: &Continuation) -> Result<(), TransportError> {
        self.queue
            .lock()
            .push_back((flow_name.to_string(), continuation.clone()));
        Ok(())
    }
}

/// The order queued hops are delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOrder {
    /// Oldest first.
    Fifo,
    /// Newest first.
    Lifo,
    /// Every queued hop at once on separate tasks.
    Concurrent,
}

/// The outcomes of every hop of one request.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Outcomes in delivery order, starting with the execute call.
    pub outcomes: Vec<ExecutionOutcome>,
}

impl RunReport {
    /// Number of hops run.
    #[must_use]
    pub fn hops(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns the terminal payload, if the request ended.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        self.outcomes.iter().find_map(ExecutionOutcome::payload)
    }

    /// Number of hops that ended the request.
    #[must_use]
    pub fn terminal_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_terminal()).count()
    }

    /// Number of hops that stopped at a join.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ExecutionOutcome::Waiting))
            .count()
    }
}

/// Drives a flow hop by hop against shared in-memory stores.
///
/// Every hop gets a freshly built executor, as it would on a separate
/// function instance.
#[derive(Clone)]
pub struct HopHarness {
    config: ExecutorConfig,
    definition: Arc<dyn FlowDefinition>,
    state: Arc<dyn StateStore>,
    data: Arc<dyn DataStore>,
    invoker: Arc<dyn FunctionInvoker>,
    transport: LoopbackTransport,
    events: Arc<CollectingEventSink>,
}

impl std::fmt::Debug for HopHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HopHarness")
            .field("flow", &self.config.flow_name)
            .field("queued", &self.transport.len())
            .finish_non_exhaustive()
    }
}

impl HopHarness {
    /// Creates a harness for `definition` with memory stores and an
    /// echoing [`MockInvoker`].
    #[must_use]
    pub fn new(definition: Arc<dyn FlowDefinition>) -> Self {
        Self {
            config: ExecutorConfig::new("test-flow")
                .with_state_secret("test-secret")
                .with_counter_retry(RetryConfig::new().with_max_attempts(100).with_base_delay_ms(1)),
            definition,
            state: Arc::new(MemoryStateStore::new()),
            data: Arc::new(MemoryDataStore::new()),
            invoker: Arc::new(MockInvoker::new()),
            transport: LoopbackTransport::new(),
            events: Arc::new(CollectingEventSink::new()),
        }
    }

    /// Replaces the invoker.
    #[must_use]
    pub fn with_invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Replaces the state store.
    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = store;
        self
    }

    /// Replaces the data store.
    #[must_use]
    pub fn with_data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.data = store;
        self
    }

    /// Adjusts the executor configuration.
    #[must_use]
    pub fn with_config(mut self, adjust: impl FnOnce(ExecutorConfig) -> ExecutorConfig) -> Self {
        self.config = adjust(self.config);
        self
    }

    /// Returns the loopback transport.
    #[must_use]
    pub fn transport(&self) -> &LoopbackTransport {
        &self.transport
    }

    /// Returns the collected events.
    #[must_use]
    pub fn events(&self) -> &CollectingEventSink {
        &self.events
    }

    /// Returns the shared state store.
    #[must_use]
    pub fn state_store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.state)
    }

    /// Returns the shared data store.
    #[must_use]
    pub fn data_store(&self) -> Arc<dyn DataStore> {
        Arc::clone(&self.data)
    }

    /// Builds a fresh executor wired to the shared parts.
    pub fn executor(&self) -> Result<FlowExecutor, FlowError> {
        FlowExecutor::builder(self.config.clone(), Arc::clone(&self.definition))
            .state_store(Arc::clone(&self.state))
            .data_store(Arc::clone(&self.data))
            .invoker(Arc::clone(&self.invoker))
            .transport(Arc::new(self.transport.clone()))
            .event_sink(self.events.clone())
            .build()
    }

    /// Runs the first hop of a new request.
    pub async fn start(&self, input: &[u8]) -> Result<ExecutionOutcome, FlowError> {
        self.executor()?.execute(RawRequest::new(input)).await
    }

    /// Delivers one queued continuation, oldest first.
    pub async fn step(&self) -> Result<Option<ExecutionOutcome>, FlowError> {
        match self.transport.pop_front() {
            Some(continuation) => Ok(Some(self.executor()?.forward(continuation).await?)),
            None => Ok(None),
        }
    }

    /// Runs a request until no continuations are left.
    pub async fn run(&self, input: &[u8], order: DrainOrder) -> Result<RunReport, FlowError> {
        let first = self.start(input).await?;
        let mut report = RunReport {
            outcomes: vec![first],
        };
        self.drain_into(&mut report, order).await?;
        Ok(report)
    }

    /// Delivers queued continuations until the queue is empty.
    pub async fn drain(&self, order: DrainOrder) -> Result<RunReport, FlowError> {
        let mut report = RunReport::default();
        self.drain_into(&mut report, order).await?;
        Ok(report)
    }

    async fn drain_into(&self, report: &mut RunReport, order: DrainOrder) -> Result<(), FlowError> {
        while !self.transport.is_empty() {
            if report.hops() > MAX_HOPS {
                return Err(FlowError::Internal(format!("request exceeded {MAX_HOPS} hops")));
            }
            match order {
                DrainOrder::Fifo | DrainOrder::Lifo => {
                    let next = if order == DrainOrder::Fifo {
                        self.transport.pop_front()
                    } else {
                        self.transport.pop_back()
                    };
                    if let Some(continuation) = next {
                        report.outcomes.push(self.executor()?.forward(continuation).await?);
                    }
                }
                DrainOrder::Concurrent => {
                    let mut handles = Vec::new();
                    for continuation in self.transport.take_all() {
                        let executor = self.executor()?;
                        handles.push(tokio::spawn(async move { executor.forward(continuation).await }));
                    }
                    for handle in handles {
                        let outcome = handle
                            .await
                            .map_err(|e| FlowError::Internal(format!("hop task failed: {e}")))??;
                        report.outcomes.push(outcome);
                    }
                }
            }
        }
        Ok(())
    }
}
