//! Transition requests and timeline records.

use chrono::{DateTime, Utc};
use parley_core::ids::{ConnectionId, RequestId};
use parley_core::lifecycle::ConnectionState;
use parley_core::priority::TransitionPriority;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One accepted request to move a connection to a new lifecycle state.
///
/// Built at acceptance time by the coordinator and consumed exactly once by
/// the scheduler: applied, discarded as stale, or purged on unregister.
/// `from_state` is the live state observed when the request was accepted; the
/// scheduler re-checks it under the record lock before applying.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRequest {
    /// Unique request ID.
    pub request_id: RequestId,
    /// Connection this request targets.
    pub connection_id: ConnectionId,
    /// Requesting subsystem tag (`"auth"`, `"factory"`, `"heartbeat"`, ...).
    pub component: String,
    /// Live state observed at acceptance.
    pub from_state: ConnectionState,
    /// Requested target state.
    pub to_state: ConnectionState,
    /// Scheduling priority.
    pub priority: TransitionPriority,
    /// Free-form context merged into the record metadata on apply.
    pub metadata: Map<String, Value>,
    /// When the request was accepted.
    pub requested_at: DateTime<Utc>,
}

impl TransitionRequest {
    /// Build a request, minting a fresh ID and stamping the current time.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        component: impl Into<String>,
        from_state: ConnectionState,
        to_state: ConnectionState,
        priority: TransitionPriority,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            request_id: RequestId::new(),
            connection_id,
            component: component.into(),
            from_state,
            to_state,
            priority,
            metadata,
            requested_at: Utc::now(),
        }
    }
}

/// One applied transition, as kept in a connection's bounded timeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The request that produced this transition.
    pub request_id: RequestId,
    /// Requesting subsystem tag.
    pub component: String,
    /// State before the transition.
    pub from_state: ConnectionState,
    /// State after the transition.
    pub to_state: ConnectionState,
    /// Priority the request was scheduled at.
    pub priority: TransitionPriority,
    /// When the transition was applied.
    pub occurred_at: DateTime<Utc>,
}

impl TransitionRecord {
    /// Build the timeline record for an applied request.
    #[must_use]
    pub fn applied(request: &TransitionRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            component: request.component.clone(),
            from_state: request.from_state,
            to_state: request.to_state,
            priority: request.priority,
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_request() -> TransitionRequest {
        let mut metadata = Map::new();
        let _ = metadata.insert("result".to_owned(), json!("auth_success"));
        TransitionRequest::new(
            ConnectionId::from("c-1"),
            "auth",
            ConnectionState::Initializing,
            ConnectionState::Authenticating,
            TransitionPriority::High,
            metadata,
        )
    }

    #[test]
    fn new_mints_unique_ids() {
        let a = make_request();
        let b = make_request();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn new_captures_fields() {
        let request = make_request();
        assert_eq!(request.connection_id.as_str(), "c-1");
        assert_eq!(request.component, "auth");
        assert_eq!(request.from_state, ConnectionState::Initializing);
        assert_eq!(request.to_state, ConnectionState::Authenticating);
        assert_eq!(request.priority, TransitionPriority::High);
        assert_eq!(request.metadata["result"], "auth_success");
    }

    #[test]
    fn applied_record_mirrors_request() {
        let request = make_request();
        let record = TransitionRecord::applied(&request);
        assert_eq!(record.request_id, request.request_id);
        assert_eq!(record.component, "auth");
        assert_eq!(record.from_state, request.from_state);
        assert_eq!(record.to_state, request.to_state);
        assert_eq!(record.priority, request.priority);
        assert!(record.occurred_at >= request.requested_at);
    }

    #[test]
    fn request_serializes_wire_strings() {
        let request = make_request();
        let val = serde_json::to_value(&request).unwrap();
        assert_eq!(val["from_state"], "INITIALIZING");
        assert_eq!(val["to_state"], "AUTHENTICATING");
        assert_eq!(val["priority"], "high");
        assert_eq!(val["metadata"]["result"], "auth_success");
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = TransitionRecord::applied(&make_request());
        let json = serde_json::to_string(&record).unwrap();
        let back: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, record.request_id);
        assert_eq!(back.to_state, record.to_state);
    }
}
