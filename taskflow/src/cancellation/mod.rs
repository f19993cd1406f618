//! Cooperative cancellation primitives.
//!
//! This module provides:
//! - CancellationToken, a tree-shaped cancellation flag
//! - CancelReason describing why a token was cancelled
//! - Cancelled, the error observed by cooperative work

mod token;

pub use token::{CancelReason, Cancelled, CancellationToken};
