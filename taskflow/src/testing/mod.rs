//! Testing utilities for code built on the task runtime.
//!
//! This module provides:
//! - A harness bundling a runtime and a bridge pumped on the test thread
//! - Assertions for task outcomes

mod assertions;
mod harness;

pub use assertions::{
    assert_outcome_cancelled, assert_outcome_failed, assert_outcome_ok, assert_outcome_timed_out,
    assert_status,
};
pub use harness::TestHarness;
