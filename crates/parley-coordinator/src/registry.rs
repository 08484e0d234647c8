//! Connection registry: per-connection records and their locks.

use crate::request::TransitionRecord;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use parley_core::ids::{ConnectionId, UserId};
use parley_core::lifecycle::ConnectionState;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Timeline capacity; overflow trims to [`TIMELINE_KEEP`].
pub const TIMELINE_CAP: usize = 50;
/// Newest entries retained after an overflow trim.
pub const TIMELINE_KEEP: usize = 25;

/// Live bookkeeping for one registered connection.
///
/// Mutated only under its registry lock: by the scheduler when applying a
/// transition, and by the registry itself at register/unregister.
#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    /// The connection this record tracks.
    pub connection_id: ConnectionId,
    /// Owning user, when known at registration.
    pub user_id: Option<UserId>,
    /// Current lifecycle state.
    pub current_state: ConnectionState,
    /// Metadata merged from applied requests.
    pub metadata: Map<String, Value>,
    /// Bounded history of applied transitions, oldest first.
    pub timeline: Vec<TransitionRecord>,
    /// When the connection was registered.
    pub registered_at: DateTime<Utc>,
}

impl ConnectionRecord {
    fn new(connection_id: ConnectionId, user_id: Option<UserId>) -> Self {
        Self {
            connection_id,
            user_id,
            current_state: ConnectionState::Initializing,
            metadata: Map::new(),
            timeline: Vec::new(),
            registered_at: Utc::now(),
        }
    }

    /// Append a timeline entry, trimming to the newest [`TIMELINE_KEEP`]
    /// once the cap is reached.
    pub fn push_timeline(&mut self, record: TransitionRecord) {
        if self.timeline.len() >= TIMELINE_CAP {
            let excess = self.timeline.len() + 1 - TIMELINE_KEEP;
            let _ = self.timeline.drain(..excess);
        }
        self.timeline.push(record);
    }
}

/// Registry of live connections.
///
/// One `parking_lot::Mutex` per record serializes all mutation for that
/// connection; removal from the map drops the lock together with the record,
/// so unregister needs no separate lock teardown.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Mutex<ConnectionRecord>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Insert a fresh record in `Initializing`.
    ///
    /// Idempotent: `false` when the connection is already registered, and
    /// the live record is left untouched.
    pub fn register(&self, connection_id: ConnectionId, user_id: Option<UserId>) -> bool {
        match self.connections.entry(connection_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug!(connection_id = %connection_id, "already registered, keeping live record");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let _ = entry.insert(Arc::new(Mutex::new(ConnectionRecord::new(
                    connection_id,
                    user_id,
                ))));
                true
            }
        }
    }

    /// Remove a connection's record. `false` when unknown.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    /// Fetch the record handle for a connection.
    #[must_use]
    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Mutex<ConnectionRecord>>> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of a connection's current state.
    #[must_use]
    pub fn state_of(&self, connection_id: &ConnectionId) -> Option<ConnectionState> {
        self.get(connection_id)
            .map(|record| record.lock().current_state)
    }

    /// Snapshot of a connection's metadata.
    #[must_use]
    pub fn metadata_of(&self, connection_id: &ConnectionId) -> Option<Map<String, Value>> {
        self.get(connection_id)
            .map(|record| record.lock().metadata.clone())
    }

    /// Snapshot of a connection's timeline, oldest first.
    #[must_use]
    pub fn timeline_of(&self, connection_id: &ConnectionId) -> Option<Vec<TransitionRecord>> {
        self.get(connection_id)
            .map(|record| record.lock().timeline.clone())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TransitionRequest;
    use parley_core::priority::TransitionPriority;

    fn make_record_entry(n: usize) -> TransitionRecord {
        let mut request = TransitionRequest::new(
            ConnectionId::from("c-1"),
            format!("component-{n}"),
            ConnectionState::EventDeliveryActive,
            ConnectionState::Degraded,
            TransitionPriority::Normal,
            Map::new(),
        );
        // Alternate the edge direction so consecutive entries chain legally.
        if n % 2 == 1 {
            request.from_state = ConnectionState::Degraded;
            request.to_state = ConnectionState::EventDeliveryActive;
        }
        TransitionRecord::applied(&request)
    }

    #[test]
    fn register_starts_in_initializing() {
        let registry = ConnectionRegistry::new();
        assert!(registry.register(ConnectionId::from("c-1"), Some(UserId::from("u-1"))));

        let id = ConnectionId::from("c-1");
        assert_eq!(registry.state_of(&id), Some(ConnectionState::Initializing));
        assert_eq!(registry.metadata_of(&id).unwrap().len(), 0);
        assert!(registry.timeline_of(&id).unwrap().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("c-1");
        assert!(registry.register(id.clone(), None));

        // Mutate the live record, then re-register.
        registry.get(&id).unwrap().lock().current_state = ConnectionState::Authenticating;
        assert!(!registry.register(id.clone(), None));

        assert_eq!(registry.state_of(&id), Some(ConnectionState::Authenticating));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_drops_the_record() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("c-1");
        let _ = registry.register(id.clone(), None);

        assert!(registry.remove(&id));
        assert!(!registry.contains(&id));
        assert!(registry.state_of(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_unknown_is_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.remove(&ConnectionId::from("nope")));
    }

    #[test]
    fn get_returns_shared_handle() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("c-1");
        let _ = registry.register(id.clone(), None);

        let a = registry.get(&id).unwrap();
        let b = registry.get(&id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn timeline_grows_until_the_cap() {
        let mut record = ConnectionRecord::new(ConnectionId::from("c-1"), None);
        for n in 0..TIMELINE_CAP {
            record.push_timeline(make_record_entry(n));
        }
        assert_eq!(record.timeline.len(), TIMELINE_CAP);
    }

    #[test]
    fn timeline_overflow_trims_to_newest() {
        let mut record = ConnectionRecord::new(ConnectionId::from("c-1"), None);
        for n in 0..=TIMELINE_CAP {
            record.push_timeline(make_record_entry(n));
        }

        assert_eq!(record.timeline.len(), TIMELINE_KEEP);
        // Newest entry survived the trim.
        assert_eq!(
            record.timeline.last().unwrap().component,
            format!("component-{TIMELINE_CAP}")
        );
        // Oldest survivors are the newest 25 of the 51 pushed.
        assert_eq!(
            record.timeline.first().unwrap().component,
            format!("component-{}", TIMELINE_CAP + 1 - TIMELINE_KEEP)
        );
    }

    #[test]
    fn snapshots_for_unknown_are_none() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("ghost");
        assert!(registry.state_of(&id).is_none());
        assert!(registry.metadata_of(&id).is_none());
        assert!(registry.timeline_of(&id).is_none());
    }
}
