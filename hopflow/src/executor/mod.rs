//! The hop executor.
//!
//! A [`FlowExecutor`] serves one flow. Each call to [`FlowExecutor::execute`]
//! (fresh request) or [`FlowExecutor::forward`] (continuation) is one hop:
//! it rebuilds the pipeline, runs exactly one node (or one dispatch of a
//! dynamic node), performs the join bookkeeping, and either returns the
//! final result or forwards signed continuations for the next hops.

mod config;
mod dynamic;
mod fanin;
mod lifecycle;
mod operations;

pub use config::{
    ExecutorConfig, ENV_AUTH_SECRET, ENV_COUNTER_MAX_ATTEMPTS, ENV_GATEWAY_URL, ENV_STATE_SECRET,
};

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::context::{
    Continuation, ExecutionPosition, InputRef, PipelineState, RawRequest, Signer,
};
use crate::core::{RequestState, TerminalState};
use crate::errors::{CoordinationError, DagError, FlowError, SignatureError};
use crate::events::{self, EventSink, FlowEvent, NoOpEventSink};
use crate::pipeline::{
    build_pipeline, Dag, DefinitionContext, FlowDefinition, Node, NodeKind, Pipeline,
};
use crate::store::{self, DataStore, EmbeddedDataStore, EmbeddedStateStore, StateStore};
use crate::transport::{ContinuationTransport, FunctionInvoker, HttpInvoker, HttpTransport};
use crate::utils::new_request_id;

/// State store key holding the request's [`RequestState`].
pub const REQUEST_STATE_KEY: &str = "request-state";
/// State store key holding continuations parked while paused.
pub const PAUSED_CONTINUATIONS_KEY: &str = "paused-continuations";

/// What a hop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The pipeline finished in this hop with this output.
    Completed(Vec<u8>),
    /// The pipeline failed and its failure handler produced this payload.
    Recovered(Vec<u8>),
    /// Continuations were forwarded to this many next hops.
    Forwarded(usize),
    /// This hop reached a join whose siblings are still outstanding.
    Waiting,
    /// The request is paused; the continuation was parked.
    Paused,
    /// The request is stopped or gone; nothing ran.
    Stopped,
}

impl ExecutionOutcome {
    /// Returns the terminal payload, if this hop ended the request.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Completed(data) | Self::Recovered(data) => Some(data),
            _ => None,
        }
    }

    /// Returns true if the request ended in this hop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.payload().is_some()
    }
}

/// Everything one hop works with.
pub(crate) struct Hop {
    pub(crate) request_id: String,
    pub(crate) query: String,
    pub(crate) pipeline: Pipeline,
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) data: Arc<dyn DataStore>,
}

/// Runs hops of one flow.
pub struct FlowExecutor {
    config: ExecutorConfig,
    definition: Arc<dyn FlowDefinition>,
    state_store: Arc<dyn StateStore>,
    data_store: Arc<dyn DataStore>,
    invoker: Arc<dyn FunctionInvoker>,
    transport: Arc<dyn ContinuationTransport>,
    events: Arc<dyn EventSink>,
    signer: Signer,
    auth: Option<Signer>,
}

impl std::fmt::Debug for FlowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowExecutor")
            .field("flow", &self.config.flow_name)
            .field("gateway", &self.config.gateway_url)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FlowExecutor`].
pub struct FlowExecutorBuilder {
    config: ExecutorConfig,
    definition: Arc<dyn FlowDefinition>,
    state_store: Option<Arc<dyn StateStore>>,
    data_store: Option<Arc<dyn DataStore>>,
    invoker: Option<Arc<dyn FunctionInvoker>>,
    transport: Option<Arc<dyn ContinuationTransport>>,
    events: Option<Arc<dyn EventSink>>,
}

impl FlowExecutorBuilder {
    /// Sets the state store; defaults to one embedded in continuations.
    #[must_use]
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Sets the data store; defaults to one embedded in continuations.
    #[must_use]
    pub fn data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.data_store = Some(store);
        self
    }

    /// Sets the function invoker; defaults to HTTP through the gateway.
    #[must_use]
    pub fn invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Sets the continuation transport; defaults to HTTP through the gateway.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn ContinuationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the event sink; defaults to discarding events.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Validates the configuration and builds the executor.
    pub fn build(self) -> Result<FlowExecutor, FlowError> {
        self.config.validate()?;
        let invoker: Arc<dyn FunctionInvoker> = match self.invoker {
            Some(invoker) => invoker,
            None => Arc::new(HttpInvoker::new(
                &self.config.gateway_url,
                self.config.http_timeout(),
            )?),
        };
        let transport: Arc<dyn ContinuationTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                &self.config.gateway_url,
                self.config.http_timeout(),
            )?),
        };
        Ok(FlowExecutor {
            signer: Signer::new(&self.config.state_secret),
            auth: self.config.auth_secret.as_ref().map(Signer::new),
            config: self.config,
            definition: self.definition,
            state_store: self
                .state_store
                .unwrap_or_else(|| Arc::new(EmbeddedStateStore::new())),
            data_store: self
                .data_store
                .unwrap_or_else(|| Arc::new(EmbeddedDataStore::new())),
            invoker,
            transport,
            events: self.events.unwrap_or_else(|| Arc::new(NoOpEventSink)),
        })
    }
}

impl FlowExecutor {
    /// Starts building an executor for `definition`.
    #[must_use]
    pub fn builder(config: ExecutorConfig, definition: Arc<dyn FlowDefinition>) -> FlowExecutorBuilder {
        FlowExecutorBuilder {
            config,
            definition,
            state_store: None,
            data_store: None,
            invoker: None,
            transport: None,
            events: None,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns the signer used for continuation states.
    #[must_use]
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Starts a fresh request at the start node of the top-level DAG.
    pub async fn execute(&self, request: RawRequest) -> Result<ExecutionOutcome, FlowError> {
        if let Some(auth) = &self.auth {
            let signature = request
                .auth_signature
                .as_deref()
                .ok_or(SignatureError::Missing)?;
            auth.verify(&request.data, signature)?;
        }

        let request_id = new_request_id();
        let span = tracing::info_span!("hop", flow = %self.config.flow_name, request_id = %request_id);
        async move {
            let (state, data) = self.stores(&request_id);
            state.init().await?;
            data.init().await?;

            let ctx = DefinitionContext::new(&request_id, &request.query);
            let pipeline = match build_pipeline(self.definition.as_ref(), &ctx) {
                Ok(pipeline) => pipeline,
                Err(err) => {
                    self.cleanup(state.as_ref(), data.as_ref()).await;
                    return Err(err);
                }
            };

            let mut hop = Hop {
                request_id,
                query: request.query,
                pipeline,
                state,
                data,
            };
            self.emit(&hop, events::PIPELINE_STARTED, None);
            let result = self.start(&mut hop, request.data).await;
            self.settle(&hop, result).await
        }
        .instrument(span)
        .await
    }

    /// Runs the hop a continuation describes.
    pub async fn forward(&self, continuation: Continuation) -> Result<ExecutionOutcome, FlowError> {
        let pipeline_state = continuation.open(&self.signer)?;
        let span = tracing::info_span!(
            "hop",
            flow = %self.config.flow_name,
            request_id = %continuation.id,
            node = %pipeline_state.position.exec_id(),
        );
        async move {
            let (state, data) = self.stores(&continuation.id);
            if let Err(e) = store::restore(&continuation.store, state.as_ref(), data.as_ref()) {
                self.cleanup(state.as_ref(), data.as_ref()).await;
                return Err(e.into());
            }

            match self.request_state(state.as_ref()).await? {
                RequestState::Running => {}
                RequestState::Paused => {
                    self.park(state.as_ref(), &continuation).await?;
                    self.events.emit(
                        &FlowEvent::new(events::HOP_PARKED, &self.config.flow_name, &continuation.id)
                            .with_node(pipeline_state.position.exec_id()),
                    );
                    return Ok(ExecutionOutcome::Paused);
                }
                RequestState::Stopped => {
                    debug!("request is not running, dropping hop");
                    return Ok(ExecutionOutcome::Stopped);
                }
            }

            let ctx = DefinitionContext::new(&continuation.id, &continuation.query);
            let pipeline = match build_pipeline(self.definition.as_ref(), &ctx) {
                Ok(pipeline) => pipeline,
                Err(err) => {
                    warn!(error = %err, "flow definition failed");
                    self.cleanup(state.as_ref(), data.as_ref()).await;
                    return Err(err);
                }
            };
            let mut hop = Hop {
                request_id: continuation.id.clone(),
                query: continuation.query.clone(),
                pipeline,
                state,
                data,
            };

            let input = match &pipeline_state.input {
                InputRef::Inline => Ok(continuation.data),
                InputRef::Stored { key } => hop.data.get(key).await.map_err(|e| {
                    if e.is_not_found() {
                        CoordinationError::MissingData { key: key.clone() }.into()
                    } else {
                        FlowError::from(e)
                    }
                }),
            };
            let result = match input {
                Ok(input) => self.run_from(&mut hop, pipeline_state.position, input).await,
                Err(err) => Err(err),
            };
            self.settle(&hop, result).await
        }
        .instrument(span)
        .await
    }

    fn stores(&self, request_id: &str) -> (Arc<dyn StateStore>, Arc<dyn DataStore>) {
        (
            self.state_store.configure(&self.config.flow_name, request_id),
            self.data_store.configure(&self.config.flow_name, request_id),
        )
    }

    async fn request_state(&self, state: &dyn StateStore) -> Result<RequestState, FlowError> {
        match state.get(REQUEST_STATE_KEY).await {
            Ok(raw) => raw.parse().map_err(FlowError::Internal),
            Err(e) if e.is_not_found() => Ok(RequestState::Stopped),
            Err(e) => Err(e.into()),
        }
    }

    async fn start(&self, hop: &mut Hop, input: Vec<u8>) -> Result<ExecutionOutcome, FlowError> {
        hop.state
            .set(REQUEST_STATE_KEY, RequestState::Running.as_str())
            .await?;
        let start = hop
            .pipeline
            .dag()
            .start()
            .ok_or(DagError::Empty)?
            .id()
            .to_string();
        self.init_join_counters(hop, hop.pipeline.dag(), "").await?;
        self.run_from(hop, ExecutionPosition::root(start), input).await
    }

    /// Runs the node at `position`, entering plain sub-DAGs in place.
    async fn run_from(
        &self,
        hop: &mut Hop,
        mut position: ExecutionPosition,
        input: Vec<u8>,
    ) -> Result<ExecutionOutcome, FlowError> {
        loop {
            hop.pipeline.set_position(position.clone());
            let hop: &Hop = hop;
            let (_, node) = position.resolve(hop.pipeline.dag())?;
            match node.kind() {
                NodeKind::SubDag(sub) => {
                    let start = sub.start().ok_or(DagError::Empty)?.id().to_string();
                    let inner = position.enter(None, start);
                    self.init_join_counters(hop, sub, &inner.level_prefix()).await?;
                    debug!(node = %position.exec_id(), "entering sub-DAG");
                    position = inner;
                }
                NodeKind::Condition { .. } | NodeKind::Foreach { .. } => {
                    return self.dispatch(hop, &position, node, &input).await;
                }
                NodeKind::Operations(_) => {
                    let output = self.run_operations(hop, &position, node, input).await?;
                    return self.advance(hop, position, output).await;
                }
            }
        }
    }

    /// Moves past a finished node: forwards its children, or climbs out of
    /// exhausted sub-DAGs until a level with children or the end is found.
    async fn advance(
        &self,
        hop: &Hop,
        mut position: ExecutionPosition,
        mut output: Vec<u8>,
    ) -> Result<ExecutionOutcome, FlowError> {
        loop {
            let (dag, node) = position.resolve(hop.pipeline.dag())?;
            if node.outdegree() > 0 {
                return self.forward_children(hop, &position, dag, node, output).await;
            }
            let Some(parent) = position.parent() else {
                info!(node = %position.exec_id(), "pipeline completed");
                return Ok(ExecutionOutcome::Completed(output));
            };
            let (_, owner) = parent.resolve(hop.pipeline.dag())?;
            if owner.kind().is_dynamic() {
                match self.join_branch(hop, &position, &parent, owner, output).await? {
                    Some(aggregate) => output = aggregate,
                    None => return Ok(ExecutionOutcome::Waiting),
                }
            }
            position = parent;
        }
    }

    async fn forward_children(
        &self,
        hop: &Hop,
        position: &ExecutionPosition,
        dag: &Dag,
        node: &Node,
        output: Vec<u8>,
    ) -> Result<ExecutionOutcome, FlowError> {
        let mut outgoing = Vec::new();
        for (child, forwarder) in dag.children(node) {
            let shaped = forwarder.and_then(|forward| forward(&output));
            let child_position = position.sibling(child.id());
            if child.indegree() <= 1 {
                outgoing.push((PipelineState::inline(child_position), shaped.unwrap_or_default()));
                continue;
            }
            if let Some(aggregate) = self
                .join_parent(hop, position, dag, node, child, forwarder.is_some(), shaped)
                .await?
            {
                outgoing.push((PipelineState::inline(child_position), aggregate));
            }
        }

        if outgoing.is_empty() {
            return Ok(ExecutionOutcome::Waiting);
        }
        let count = self.send(hop, outgoing).await?;
        Ok(ExecutionOutcome::Forwarded(count))
    }

    /// Seals and forwards continuations, snapshotting embedded stores after
    /// every write of this hop.
    pub(crate) async fn send(
        &self,
        hop: &Hop,
        outgoing: Vec<(PipelineState, Vec<u8>)>,
    ) -> Result<usize, FlowError> {
        let snapshot = store::snapshot(hop.state.as_ref(), hop.data.as_ref());
        let mut sealed = Vec::with_capacity(outgoing.len());
        for (state, data) in outgoing {
            sealed.push(Continuation::seal(
                &self.signer,
                &hop.request_id,
                &hop.query,
                &state,
                data,
                snapshot.clone(),
            )?);
        }
        try_join_all(
            sealed
                .iter()
                .map(|continuation| self.transport.forward(&self.config.flow_name, continuation)),
        )
        .await?;
        debug!(count = sealed.len(), "forwarded continuations");
        Ok(sealed.len())
    }

    /// Applies failure handling and the finally handler to a hop result.
    async fn settle(
        &self,
        hop: &Hop,
        result: Result<ExecutionOutcome, FlowError>,
    ) -> Result<ExecutionOutcome, FlowError> {
        match result {
            Ok(ExecutionOutcome::Completed(output)) => {
                if let Some(finally) = hop.pipeline.finally_handler() {
                    finally(TerminalState::Success);
                }
                self.cleanup(hop.state.as_ref(), hop.data.as_ref()).await;
                self.emit(
                    hop,
                    events::PIPELINE_COMPLETED,
                    Some(serde_json::json!({ "bytes": output.len() })),
                );
                Ok(ExecutionOutcome::Completed(output))
            }
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let node = hop.pipeline.position().map(ExecutionPosition::exec_id);
                warn!(error = %err, node = node.as_deref().unwrap_or("-"), "pipeline failed");
                let details = serde_json::to_value(err.to_dict()).unwrap_or_default();
                if let Some(node) = &node {
                    self.events.emit(
                        &FlowEvent::new(events::NODE_FAILED, &self.config.flow_name, &hop.request_id)
                            .with_node(node)
                            .with_data(details.clone()),
                    );
                }
                self.emit(hop, events::PIPELINE_FAILED, Some(details));

                let payload = hop
                    .pipeline
                    .failure_handler()
                    .and_then(|handler| handler(&err));
                if let Some(finally) = hop.pipeline.finally_handler() {
                    finally(TerminalState::Failure);
                }
                self.cleanup(hop.state.as_ref(), hop.data.as_ref()).await;
                payload.map_or(Err(err), |payload| Ok(ExecutionOutcome::Recovered(payload)))
            }
        }
    }

    async fn cleanup(&self, state: &dyn StateStore, data: &dyn DataStore) {
        if let Err(e) = data.cleanup().await {
            warn!(error = %e, "data store cleanup failed");
        }
        if let Err(e) = state.cleanup().await {
            warn!(error = %e, "state store cleanup failed");
        }
    }

    fn emit(&self, hop: &Hop, event_type: &str, data: Option<serde_json::Value>) {
        let mut event = FlowEvent::new(event_type, &self.config.flow_name, &hop.request_id);
        if let Some(data) = data {
            event = event.with_data(data);
        }
        self.events.emit(&event);
    }

    fn emit_node(&self, hop: &Hop, event_type: &str, node: &str, data: serde_json::Value) {
        self.events.emit(
            &FlowEvent::new(event_type, &self.config.flow_name, &hop.request_id)
                .with_node(node)
                .with_data(data),
        );
    }
}
