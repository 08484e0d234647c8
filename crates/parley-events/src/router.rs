//! Emitter registry: one emitter per run, strict per-user isolation.
//!
//! The router is the only place emitters are created, so the isolation
//! invariant is enforced structurally: lookups and inserts happen under a
//! single lock, every caller asking for the same [`EmitterKey`] receives the
//! same `Arc<RunEmitter>`, and no key can ever observe another key's emitter.
//! One user's slow or broken connection therefore cannot leak events into —
//! or steal events from — anyone else's.

use crate::emitter::RunEmitter;
use crate::key::EmitterKey;
use metrics::gauge;
use parking_lot::RwLock;
use parley_core::ids::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of live [`RunEmitter`]s keyed by (user, thread, run).
pub struct EventRouter {
    emitters: RwLock<HashMap<EmitterKey, Arc<RunEmitter>>>,
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            emitters: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the emitter for `key`, creating it if absent.
    ///
    /// Lookup and insert happen under one write lock, so concurrent callers
    /// with the same key always receive the same instance — never two
    /// emitters racing to own one run.
    pub fn get_or_create(&self, key: &EmitterKey) -> Arc<RunEmitter> {
        let mut emitters = self.emitters.write();
        emitters
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(key = %key, "emitter created");
                gauge!("router_emitters_active").increment(1.0);
                Arc::new(RunEmitter::new(key.clone()))
            })
            .clone()
    }

    /// Fetch the emitter for `key` without creating one.
    #[must_use]
    pub fn get(&self, key: &EmitterKey) -> Option<Arc<RunEmitter>> {
        self.emitters.read().get(key).cloned()
    }

    /// Remove and clean up one emitter.
    ///
    /// Idempotent: `false` when the key is unknown (or already cleaned).
    /// Any `Arc` still held elsewhere stays safe to call but is permanently
    /// inert after this.
    pub fn cleanup_emitter(&self, key: &EmitterKey) -> bool {
        let removed = self.emitters.write().remove(key);
        match removed {
            Some(emitter) => {
                emitter.cleanup();
                gauge!("router_emitters_active").decrement(1.0);
                debug!(key = %key, "emitter removed");
                true
            }
            None => false,
        }
    }

    /// Remove and clean up every emitter belonging to `user_id`.
    ///
    /// Connection-teardown path: when a user's socket goes away, all of their
    /// runs stop emitting at once. Returns how many emitters were swept.
    pub fn cleanup_user(&self, user_id: &UserId) -> usize {
        let mut emitters = self.emitters.write();
        let before = emitters.len();
        emitters.retain(|key, emitter| {
            if key.user_id == *user_id {
                emitter.cleanup();
                false
            } else {
                true
            }
        });
        let swept = before - emitters.len();
        if swept > 0 {
            #[allow(clippy::cast_precision_loss)]
            gauge!("router_emitters_active").decrement(swept as f64);
            debug!(user_id = %user_id, swept, "user emitters cleaned up");
        }
        swept
    }

    /// Remove and clean up every emitter. Returns how many were swept.
    pub fn cleanup_all(&self) -> usize {
        let mut emitters = self.emitters.write();
        let swept = emitters.len();
        for emitter in emitters.values() {
            emitter.cleanup();
        }
        emitters.clear();
        gauge!("router_emitters_active").set(0.0);
        swept
    }

    /// Number of live emitters.
    #[must_use]
    pub fn emitter_count(&self) -> usize {
        self.emitters.read().len()
    }

    /// Keys of all live emitters (unordered).
    #[must_use]
    pub fn active_keys(&self) -> Vec<EmitterKey> {
        self.emitters.read().keys().cloned().collect()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::{RunId, ThreadId};

    fn make_key(user: &str, run: &str) -> EmitterKey {
        EmitterKey::new(
            parley_core::ids::UserId::from(user),
            ThreadId::from("t-1"),
            RunId::from(run),
        )
    }

    #[test]
    fn get_or_create_returns_same_instance() {
        let router = EventRouter::new();
        let key = make_key("u-1", "r-1");

        let a = router.get_or_create(&key);
        let b = router.get_or_create(&key);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(router.emitter_count(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_emitters() {
        let router = EventRouter::new();
        let a = router.get_or_create(&make_key("u-1", "r-1"));
        let b = router.get_or_create(&make_key("u-1", "r-2"));
        let c = router.get_or_create(&make_key("u-2", "r-1"));

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(router.emitter_count(), 3);
    }

    #[test]
    fn get_does_not_create() {
        let router = EventRouter::new();
        assert!(router.get(&make_key("u-1", "r-1")).is_none());
        assert_eq!(router.emitter_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_emitter_removes_and_inerts() {
        let router = EventRouter::new();
        let key = make_key("u-1", "r-1");
        let held = router.get_or_create(&key);

        assert!(router.cleanup_emitter(&key));
        assert!(router.get(&key).is_none());
        assert_eq!(router.emitter_count(), 0);

        // The held handle survives but is inert.
        assert!(held.is_cleaned());
        let outcome = held.emit_execution_thinking("late").await;
        assert!(!outcome.is_delivered());
    }

    #[test]
    fn cleanup_emitter_is_idempotent() {
        let router = EventRouter::new();
        let key = make_key("u-1", "r-1");
        let _ = router.get_or_create(&key);

        assert!(router.cleanup_emitter(&key));
        assert!(!router.cleanup_emitter(&key));
    }

    #[test]
    fn cleanup_user_sweeps_only_that_user() {
        let router = EventRouter::new();
        let _ = router.get_or_create(&make_key("u-1", "r-1"));
        let _ = router.get_or_create(&make_key("u-1", "r-2"));
        let survivor_key = make_key("u-2", "r-3");
        let survivor = router.get_or_create(&survivor_key);

        let swept = router.cleanup_user(&parley_core::ids::UserId::from("u-1"));

        assert_eq!(swept, 2);
        assert_eq!(router.emitter_count(), 1);
        assert!(!survivor.is_cleaned());
        assert!(router.get(&survivor_key).is_some());
    }

    #[test]
    fn cleanup_user_with_no_emitters_sweeps_nothing() {
        let router = EventRouter::new();
        let _ = router.get_or_create(&make_key("u-1", "r-1"));
        assert_eq!(router.cleanup_user(&parley_core::ids::UserId::from("u-9")), 0);
        assert_eq!(router.emitter_count(), 1);
    }

    #[test]
    fn cleanup_all_sweeps_everything() {
        let router = EventRouter::new();
        let held = router.get_or_create(&make_key("u-1", "r-1"));
        let _ = router.get_or_create(&make_key("u-2", "r-2"));

        assert_eq!(router.cleanup_all(), 2);
        assert_eq!(router.emitter_count(), 0);
        assert!(held.is_cleaned());
    }

    #[test]
    fn active_keys_reflect_registry() {
        let router = EventRouter::new();
        let key = make_key("u-1", "r-1");
        let _ = router.get_or_create(&key);

        let keys = router.active_keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0], key);
    }
}
