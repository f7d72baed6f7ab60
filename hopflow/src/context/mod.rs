//! Hop context: where a hop runs and what travels between hops.
//!
//! This module provides:
//! - [`ExecutionPosition`], the frame stack naming the node a hop runs
//! - [`Continuation`], the signed wire format between hops
//! - [`Signer`], HMAC-SHA256 signing of states and request bodies
//! - [`RawRequest`], a fresh request entering the execute endpoint

mod continuation;
mod position;
mod request;
mod signing;

pub use continuation::{base64_bytes, Continuation, InputRef, PipelineState};
pub use position::{ExecutionPosition, Frame};
pub use request::RawRequest;
pub use signing::Signer;
