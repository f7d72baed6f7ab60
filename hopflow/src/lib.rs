//! # Hopflow
//!
//! A DAG execution engine for serverless pipelines.
//!
//! A flow is a directed acyclic graph of nodes. Each node runs a list of
//! operations (remote functions, callback URLs or in-process modifiers), a
//! plain sub-DAG, or a dynamic construct (a condition picking named
//! branches, or a foreach fanning out over the input). The engine runs one
//! node per invocation and hands the rest of the work to the next
//! invocation with a signed continuation, so no process ever holds a whole
//! request.
//!
//! - **Stateless hops**: every hop rebuilds the pipeline from user code
//!   and resumes at the execution position carried by the continuation
//! - **Exactly-once joins**: fan-ins and dynamic branches meet through
//!   compare-and-swap counters in a shared state store
//! - **Signed state**: continuations carry an HMAC-SHA256 signature that is
//!   checked before any user code runs
//! - **Lifecycle control**: requests can be paused, resumed and stopped
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hopflow::prelude::*;
//!
//! let definition = Arc::new(|p: &mut Pipeline, _: &DefinitionContext| -> anyhow::Result<()> {
//!     let dag = p.dag_mut();
//!     dag.add_vertex("fetch", vec![Operation::function("fetch")])?;
//!     dag.add_vertex("store", vec![Operation::function("store")])?;
//!     dag.add_edge("fetch", "store")?;
//!     Ok(())
//! });
//!
//! let executor = FlowExecutor::builder(ExecutorConfig::from_env("orders")?, definition)
//!     .state_store(Arc::new(MemoryStateStore::new()))
//!     .data_store(Arc::new(MemoryDataStore::new()))
//!     .build()?;
//!
//! let outcome = executor.execute(RawRequest::new(body)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod transport;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::context::{Continuation, ExecutionPosition, RawRequest, Signer};
    pub use crate::core::{Operation, RequestState, TerminalState};
    pub use crate::errors::{ErrorKind, FlowError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{ExecutionOutcome, ExecutorConfig, FlowExecutor};
    pub use crate::observability::{init_tracing, TracingConfig};
    pub use crate::pipeline::{
        Dag, DefinitionContext, EdgeOptions, FlowDefinition, Pipeline, RetryConfig,
    };
    pub use crate::store::{
        DataStore, EmbeddedDataStore, EmbeddedStateStore, MemoryDataStore, MemoryStateStore,
        StateStore,
    };
    pub use crate::transport::{
        ContinuationTransport, FunctionInvoker, HttpInvoker, HttpTransport, InvocationResponse,
    };
    pub use crate::utils::{iso_timestamp, new_request_id};
}
