//! Coordinator and heartbeat configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the connection coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Scheduler sleep between drain passes, in milliseconds.
    pub tick_interval_ms: u64,
    /// Applied transitions between throttle pauses.
    pub throttle_every: u32,
    /// Throttle pause duration, in milliseconds.
    pub throttle_pause_ms: u64,
    /// Per-connection heartbeat settings.
    pub heartbeat: HeartbeatConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            throttle_every: 100,
            throttle_pause_ms: 250,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Configuration for one connection's heartbeat monitor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between pings, in milliseconds.
    pub ping_interval_ms: u64,
    /// Grace wait after a ping before evaluating the response, in milliseconds.
    pub pong_grace_ms: u64,
    /// Consecutive missed pongs before declaring timeout.
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30_000,
            pong_grace_ms: 5_000,
            max_missed: 3,
        }
    }
}
