//! Testing utilities for hopflow flows.
//!
//! This module provides:
//! - [`HopHarness`], which runs a request hop by hop in-process
//! - Mock function invokers, contended stores and write-logging stores
//! - Ready-made flow definitions and outcome assertions

mod assertions;
mod fixtures;
mod harness;
mod mocks;

pub use assertions::{assert_completed, assert_event_order, assert_forwarded};
pub use fixtures::{diamond, even_odd, foreach_letters, nested, parse_number};
pub use harness::{DrainOrder, HopHarness, LoopbackTransport, RunReport};
pub use mocks::{
    ConflictingStateStore, LoggingDataStore, LoggingStateStore, MockInvoker, RecordedCall,
    StoreWrite, WriteLog,
};
