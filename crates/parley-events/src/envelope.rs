//! Execution event types and the wire envelope.
//!
//! [`ExecutionEventType`] enumerates the fixed vocabulary an agent run can
//! emit. [`ExecutionEnvelope`] wraps one event for delivery, stamping the
//! owning identity (`user_id` / `thread_id` / `run_id`), a server timestamp,
//! and a unique `event_id` into the payload.
//!
//! These shapes match the client wire format exactly — the web and mobile
//! clients key on the hyphenated type strings and the snake_case data keys.

use crate::key::EmitterKey;
use parley_core::ids::EventId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event types an agent run can emit to its owning user.
///
/// Each variant serializes to a hyphenated string matching the client
/// `ExecutionEvent` constant object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionEventType {
    /// The run began executing.
    #[serde(rename = "execution-started")]
    ExecutionStarted,
    /// The agent produced intermediate reasoning for display.
    #[serde(rename = "execution-thinking")]
    ExecutionThinking,
    /// A plan step started executing.
    #[serde(rename = "step-executing")]
    StepExecuting,
    /// A plan step finished.
    #[serde(rename = "step-completed")]
    StepCompleted,
    /// The run finished successfully.
    #[serde(rename = "execution-completed")]
    ExecutionCompleted,
    /// The run aborted with an error.
    #[serde(rename = "execution-error")]
    ExecutionError,
}

/// All execution event type variants, for exhaustive testing.
pub const ALL_EXECUTION_EVENT_TYPES: &[ExecutionEventType] = &[
    ExecutionEventType::ExecutionStarted,
    ExecutionEventType::ExecutionThinking,
    ExecutionEventType::StepExecuting,
    ExecutionEventType::StepCompleted,
    ExecutionEventType::ExecutionCompleted,
    ExecutionEventType::ExecutionError,
];

impl ExecutionEventType {
    /// Wire string for this event type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecutionStarted => "execution-started",
            Self::ExecutionThinking => "execution-thinking",
            Self::StepExecuting => "step-executing",
            Self::StepCompleted => "step-completed",
            Self::ExecutionCompleted => "execution-completed",
            Self::ExecutionError => "execution-error",
        }
    }

    /// Whether this event ends the run (nothing should follow it).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ExecutionCompleted | Self::ExecutionError)
    }
}

/// Envelope wrapping one execution event for delivery.
///
/// Serialized shape (wire contract):
/// ```json
/// { "type": "execution-started",
///   "data": { "...caller payload", "user_id": "...", "thread_id": "...",
///             "run_id": "...", "timestamp": "...", "event_id": "..." } }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionEnvelope {
    /// Execution event type.
    #[serde(rename = "type")]
    pub event_type: ExecutionEventType,
    /// Event payload plus the stamped identity keys.
    pub data: Value,
}

impl ExecutionEnvelope {
    /// Build an envelope, stamping identity, timestamp, and event ID into the
    /// payload.
    ///
    /// Object payloads are merged key-by-key; any other payload is nested
    /// under a `"payload"` key. The stamped keys (`user_id`, `thread_id`,
    /// `run_id`, `timestamp`, `event_id`) always win — a caller cannot
    /// impersonate another user by smuggling identity keys into the payload.
    #[must_use]
    pub fn stamped(event_type: ExecutionEventType, key: &EmitterKey, payload: Value) -> Self {
        let mut data = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                let _ = map.insert("payload".to_owned(), other);
                map
            }
        };

        let _ = data.insert(
            "user_id".to_owned(),
            Value::String(key.user_id.as_str().to_owned()),
        );
        let _ = data.insert(
            "thread_id".to_owned(),
            Value::String(key.thread_id.as_str().to_owned()),
        );
        let _ = data.insert(
            "run_id".to_owned(),
            Value::String(key.run_id.as_str().to_owned()),
        );
        let _ = data.insert(
            "timestamp".to_owned(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        let _ = data.insert(
            "event_id".to_owned(),
            Value::String(EventId::new().into_inner()),
        );

        Self {
            event_type,
            data: Value::Object(data),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
