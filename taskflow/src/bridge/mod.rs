//! Delivery bridge: marshals background completions onto the UI thread.
//!
//! Pool threads never touch UI or coordinator state directly. They post a
//! callback to the [`DeliveryBridge`], and the UI-owning thread runs queued
//! callbacks one drain at a time.

mod delivery;
mod metrics;

pub use delivery::DeliveryBridge;
pub use metrics::BridgeMetrics;
