//! The DAG model and pipeline definitions.
//!
//! This module provides:
//! - [`Dag`] and [`Node`], the graph built by flow definitions
//! - [`Pipeline`] and [`FlowDefinition`], rebuilt on every hop
//! - Graphviz and JSON export
//! - The retry policy used by coordination counters

mod dag;
mod definition;
mod export;
mod node;
mod retry;


pub use dag::Dag;
pub use definition::{
    build_pipeline, DefinitionContext, FinallyFn, FlowDefinition, Pipeline, PipelineFailureFn,
};
pub use export::{DagDescription, EdgeDescription, NodeDescription};
pub use node::{
    identity_forwarder, AggregatorFn, ConditionFn, EdgeOptions, ForeachFn, ForwarderFn, Node,
    NodeKind,
};
pub use retry::{
    should_retry, with_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision,
    RetryError, RetryState,
};
