//! # parley-coordinator
//!
//! Connection state coordination for the Parley realtime layer.
//!
//! - **Coordinator**: per-connection lifecycle records, a priority-bucketed
//!   transition queue, and a scheduler loop applying requests with a
//!   compare-then-apply staleness check
//! - **Heartbeat**: one ping/pong liveness loop per monitored connection,
//!   feeding timeouts back through the same transition-request path
//! - **Config / metrics**: plain-serde configuration with sensible defaults,
//!   metric names recorded through the `metrics` facade
//!
//! Nothing here raises across the public boundary: fallible operations
//! return booleans or snapshots, and background-loop failures land in
//! counters and logs.

#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod heartbeat;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod request;
