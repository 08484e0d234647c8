//! Per-run event emitter.
//!
//! One [`RunEmitter`] exists per [`EmitterKey`] (user / thread / run). It owns
//! every event the run produces: stamping the envelope, recording it in a
//! bounded diagnostic buffer, and handing the serialized frame to the
//! connection's transport. Delivery failures are captured in counters and
//! logs — they never propagate into the agent's execution path.

use crate::envelope::{ExecutionEnvelope, ExecutionEventType};
use crate::key::EmitterKey;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use parley_core::transport::ConnectionTransport;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Diagnostic buffer capacity; overflow trims to [`RECENT_KEEP`].
const RECENT_CAP: usize = 100;
/// Newest entries retained after an overflow trim.
const RECENT_KEEP: usize = 50;

/// Result of one emission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The frame reached the transport.
    Delivered,
    /// Nothing was attempted: no transport attached, or the emitter was
    /// cleaned up. Deliberately neither success nor failure.
    Skipped,
    /// The transport rejected the frame.
    Failed,
}

impl EmitOutcome {
    /// Whether the frame reached the transport.
    #[must_use]
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Counter snapshot for one emitter.
#[derive(Debug, Clone, Serialize)]
pub struct EmitterStats {
    /// Frames accepted by the transport.
    pub events_sent: u64,
    /// Frames the transport rejected.
    pub events_failed: u64,
    /// Envelopes currently held in the diagnostic buffer.
    pub buffered: usize,
    /// When the last frame was delivered.
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Emits execution events for exactly one agent run.
///
/// The transport is attached after construction (runs are created before the
/// realtime layer finishes its handshake) and may be swapped on reconnect.
/// [`cleanup`](RunEmitter::cleanup) makes the emitter permanently inert: a
/// stale `Arc` held by a finished run can keep calling emit methods safely,
/// and nothing will be buffered or delivered.
pub struct RunEmitter {
    key: EmitterKey,
    transport: RwLock<Option<Arc<dyn ConnectionTransport>>>,
    events_sent: AtomicU64,
    events_failed: AtomicU64,
    last_event_at: Mutex<Option<DateTime<Utc>>>,
    recent: Mutex<VecDeque<ExecutionEnvelope>>,
    cleaned: AtomicBool,
}

impl RunEmitter {
    /// Create an emitter for one run. No transport is attached yet.
    #[must_use]
    pub fn new(key: EmitterKey) -> Self {
        Self {
            key,
            transport: RwLock::new(None),
            events_sent: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            last_event_at: Mutex::new(None),
            recent: Mutex::new(VecDeque::new()),
            cleaned: AtomicBool::new(false),
        }
    }

    /// The key this emitter is scoped to.
    #[must_use]
    pub fn key(&self) -> &EmitterKey {
        &self.key
    }

    /// Attach (or replace) the delivery transport. Ignored after cleanup.
    pub fn set_transport(&self, transport: Arc<dyn ConnectionTransport>) {
        if self.cleaned.load(Ordering::SeqCst) {
            debug!(key = %self.key, "ignoring transport on cleaned emitter");
            return;
        }
        *self.transport.write() = Some(transport);
    }

    /// Detach the transport; subsequent emissions are skipped.
    pub fn clear_transport(&self) {
        *self.transport.write() = None;
    }

    /// Emit one event: stamp, buffer, deliver.
    ///
    /// With no transport attached the event is buffered and skipped — a
    /// documented no-op so a run may start emitting before its connection
    /// finishes the handshake. Transport errors are counted and logged,
    /// never raised.
    pub async fn emit(&self, event_type: ExecutionEventType, payload: Value) -> EmitOutcome {
        if self.cleaned.load(Ordering::SeqCst) {
            return EmitOutcome::Skipped;
        }

        let envelope = ExecutionEnvelope::stamped(event_type, &self.key, payload);
        self.buffer(envelope.clone());

        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            debug!(key = %self.key, event_type = event_type.as_str(), "no transport, skipping emit");
            return EmitOutcome::Skipped;
        };

        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(error) => {
                let _ = self.events_failed.fetch_add(1, Ordering::Relaxed);
                warn!(key = %self.key, %error, "failed to serialize envelope");
                return EmitOutcome::Failed;
            }
        };

        match transport.send_text(&frame).await {
            Ok(()) => {
                let _ = self.events_sent.fetch_add(1, Ordering::Relaxed);
                *self.last_event_at.lock() = Some(Utc::now());
                counter!("emitter_events_sent_total").increment(1);
                EmitOutcome::Delivered
            }
            Err(error) => {
                let _ = self.events_failed.fetch_add(1, Ordering::Relaxed);
                counter!("emitter_events_failed_total").increment(1);
                warn!(
                    key = %self.key,
                    event_type = event_type.as_str(),
                    %error,
                    "event delivery failed"
                );
                EmitOutcome::Failed
            }
        }
    }

    /// The run began executing. `payload` carries free-form run context.
    pub async fn emit_execution_started(&self, payload: Value) -> EmitOutcome {
        self.emit(ExecutionEventType::ExecutionStarted, payload).await
    }

    /// Intermediate reasoning for live display.
    pub async fn emit_execution_thinking(&self, content: &str) -> EmitOutcome {
        self.emit(
            ExecutionEventType::ExecutionThinking,
            json!({ "content": content }),
        )
        .await
    }

    /// A plan step started.
    pub async fn emit_step_executing(&self, step: u32, description: &str) -> EmitOutcome {
        self.emit(
            ExecutionEventType::StepExecuting,
            json!({ "step": step, "description": description }),
        )
        .await
    }

    /// A plan step finished.
    pub async fn emit_step_completed(&self, step: u32, result: Value) -> EmitOutcome {
        self.emit(
            ExecutionEventType::StepCompleted,
            json!({ "step": step, "result": result }),
        )
        .await
    }

    /// The run finished successfully.
    pub async fn emit_execution_completed(&self, result: Value) -> EmitOutcome {
        self.emit(
            ExecutionEventType::ExecutionCompleted,
            json!({ "result": result }),
        )
        .await
    }

    /// The run aborted.
    pub async fn emit_execution_error(&self, error: &str) -> EmitOutcome {
        self.emit(ExecutionEventType::ExecutionError, json!({ "error": error }))
            .await
    }

    /// Counter snapshot. Counters survive cleanup for post-mortem reads.
    #[must_use]
    pub fn stats(&self) -> EmitterStats {
        EmitterStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            buffered: self.recent.lock().len(),
            last_event_at: *self.last_event_at.lock(),
        }
    }

    /// Copy of the diagnostic buffer, oldest first. Non-authoritative; the
    /// buffer exists for debugging, never for redelivery.
    #[must_use]
    pub fn recent_events(&self) -> Vec<ExecutionEnvelope> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Whether [`cleanup`](RunEmitter::cleanup) has run.
    #[must_use]
    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// Make the emitter permanently inert: detach the transport and drop the
    /// buffer. Idempotent; later emit calls are skipped without effect.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.transport.write() = None;
        self.recent.lock().clear();
        debug!(key = %self.key, "emitter cleaned up");
    }

    fn buffer(&self, envelope: ExecutionEnvelope) {
        let mut recent = self.recent.lock();
        if recent.len() >= RECENT_CAP {
            let excess = recent.len() + 1 - RECENT_KEEP;
            let _ = recent.drain(..excess);
        }
        recent.push_back(envelope);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
