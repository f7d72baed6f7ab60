//! Core domain model types for hopflow.
//!
//! This module contains the leaf types used throughout the engine:
//! - The operation model attached to nodes
//! - Request lifecycle and terminal state enums

mod operation;
mod status;

pub use operation::{FailureHandlerFn, ModifierFn, Operation, OperationKind, ResponseHandlerFn};
pub use status::{RequestState, TerminalState};
