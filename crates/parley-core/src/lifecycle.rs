//! Connection lifecycle state machine.
//!
//! Every realtime connection walks a fixed pipeline on its way to full
//! service:
//!
//! ```text
//! INITIALIZING -> AUTHENTICATING -> FACTORY_CREATING -> MANAGER_READY -> EVENT_DELIVERY_ACTIVE
//! ```
//!
//! with `DEGRADED`, `FAILED`, and `DISCONNECTED` as the off-ramps. The legal
//! edges live in one static table ([`ConnectionState::successors`]) so every
//! consumer — the coordinator's validation, the scheduler's staleness check,
//! tests — agrees on the same graph. The table is pure data: no edge is ever
//! decided at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one realtime connection.
///
/// Wire strings are SCREAMING_SNAKE_CASE and must not change: clients and the
/// ops dashboards key on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Socket accepted, nothing verified yet. Every connection starts here.
    Initializing,
    /// Credentials are being checked.
    Authenticating,
    /// Auth passed; the per-user agent factory is building the manager.
    FactoryCreating,
    /// Manager exists; event delivery has not started.
    ManagerReady,
    /// Full service: events are flowing to the client.
    EventDeliveryActive,
    /// Connected but impaired (event delivery stopped); recoverable.
    Degraded,
    /// Something broke; only re-initialization or disconnect leads out.
    Failed,
    /// Socket gone. Re-entry only through `INITIALIZING`.
    Disconnected,
}

/// All lifecycle states, in pipeline order.
pub const ALL_CONNECTION_STATES: [ConnectionState; 8] = [
    ConnectionState::Initializing,
    ConnectionState::Authenticating,
    ConnectionState::FactoryCreating,
    ConnectionState::ManagerReady,
    ConnectionState::EventDeliveryActive,
    ConnectionState::Degraded,
    ConnectionState::Failed,
    ConnectionState::Disconnected,
];

impl ConnectionState {
    /// Wire string for this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Authenticating => "AUTHENTICATING",
            Self::FactoryCreating => "FACTORY_CREATING",
            Self::ManagerReady => "MANAGER_READY",
            Self::EventDeliveryActive => "EVENT_DELIVERY_ACTIVE",
            Self::Degraded => "DEGRADED",
            Self::Failed => "FAILED",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    /// The states this state may legally transition to.
    ///
    /// Self-loops are never legal. `FAILED` recovers only through
    /// `INITIALIZING`; `DISCONNECTED` re-enters the same way.
    #[must_use]
    pub fn successors(self) -> &'static [ConnectionState] {
        match self {
            Self::Initializing => &[
                Self::Authenticating,
                Self::Failed,
                Self::Disconnected,
            ],
            Self::Authenticating => &[
                Self::FactoryCreating,
                Self::Failed,
                Self::Disconnected,
                Self::Degraded,
            ],
            Self::FactoryCreating => &[
                Self::ManagerReady,
                Self::Failed,
                Self::Disconnected,
                Self::Degraded,
            ],
            Self::ManagerReady => &[
                Self::EventDeliveryActive,
                Self::Failed,
                Self::Disconnected,
                Self::Degraded,
            ],
            Self::EventDeliveryActive => &[
                Self::Failed,
                Self::Disconnected,
                Self::Degraded,
            ],
            Self::Degraded => &[
                Self::ManagerReady,
                Self::EventDeliveryActive,
                Self::Failed,
                Self::Disconnected,
            ],
            Self::Failed => &[Self::Initializing, Self::Disconnected],
            Self::Disconnected => &[Self::Initializing],
        }
    }

    /// Whether the edge `self -> to` is in the transition table.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.successors().contains(&to)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Initializing
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
