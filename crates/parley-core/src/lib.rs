//! # parley-core
//!
//! Foundation types for the Parley realtime layer.
//!
//! This crate provides the shared vocabulary the coordination crates depend on:
//!
//! - **Branded IDs**: `ConnectionId`, `UserId`, `ThreadId`, `RunId`, `RequestId`,
//!   `EventId` as `String` newtypes for type safety
//! - **Lifecycle FSM**: `ConnectionState` with the static legal-transition table
//! - **Priorities**: `TransitionPriority` with `Critical`-first scheduler ordering
//! - **Transport seam**: `ConnectionTransport` trait + `TransportError`, the
//!   only contact point with the realtime edge

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod lifecycle;
pub mod priority;
pub mod transport;
