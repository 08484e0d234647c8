//! # parley-events
//!
//! Per-user event emission isolation for agent runs.
//!
//! - **Emitter key**: `(user_id, thread_id, run_id)`, the isolation boundary
//! - **Envelope**: `ExecutionEnvelope` stamping identity, timestamp, and event
//!   ID into every payload; wire strings match the clients exactly
//! - **Run emitter**: fixed vocabulary (`execution-started` .. `execution-error`),
//!   swappable transport, bounded diagnostic buffer, idempotent cleanup
//! - **Event router**: single-lock emitter registry; same key means same
//!   emitter instance, different keys are fully disjoint

#![deny(unsafe_code)]

pub mod emitter;
pub mod envelope;
pub mod key;
pub mod router;
