//! Emitter scoping key.

use parley_core::ids::{RunId, ThreadId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The isolation boundary for event emission: one agent run, in one thread,
/// for one user.
///
/// Two keys that differ in any component address entirely separate emitters.
/// Nothing emitted under one key is ever observable through another — that is
/// the contract the router and emitters are built around.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmitterKey {
    /// Owning user.
    pub user_id: UserId,
    /// Conversation thread the run belongs to.
    pub thread_id: ThreadId,
    /// The agent run itself.
    pub run_id: RunId,
}

impl EmitterKey {
    /// Build a key from its three components.
    #[must_use]
    pub fn new(user_id: UserId, thread_id: ThreadId, run_id: RunId) -> Self {
        Self {
            user_id,
            thread_id,
            run_id,
        }
    }
}

impl fmt::Display for EmitterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.thread_id, self.run_id)
    }
}
