//! Priority-bucketed pending-request queue.
//!
//! Accepted transition requests wait here until the scheduler drains them.
//! One FIFO bucket per priority, all behind a single mutex; the scheduler
//! scans buckets highest-first and pops at most one request per bucket per
//! pass.

use crate::metrics::COORDINATOR_CONFLICTS_TOTAL;
use crate::request::TransitionRequest;
use metrics::counter;
use parking_lot::Mutex;
use parley_core::ids::ConnectionId;
use parley_core::priority::TransitionPriority;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

/// Per-priority queue lengths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    /// Pending `Background` requests.
    pub background: usize,
    /// Pending `Low` requests.
    pub low: usize,
    /// Pending `Normal` requests.
    pub normal: usize,
    /// Pending `High` requests.
    pub high: usize,
    /// Pending `Critical` requests.
    pub critical: usize,
}

impl QueueDepths {
    /// Total pending requests across all buckets.
    #[must_use]
    pub fn total(&self) -> usize {
        self.background + self.low + self.normal + self.high + self.critical
    }

    /// Depth of one bucket.
    #[must_use]
    pub fn depth(&self, priority: TransitionPriority) -> usize {
        match priority {
            TransitionPriority::Background => self.background,
            TransitionPriority::Low => self.low,
            TransitionPriority::Normal => self.normal,
            TransitionPriority::High => self.high,
            TransitionPriority::Critical => self.critical,
        }
    }
}

/// Pending transition requests, bucketed by priority.
pub struct PendingQueue {
    buckets: Mutex<[VecDeque<TransitionRequest>; 5]>,
}

impl PendingQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
        }
    }

    /// Append a request to its priority bucket.
    ///
    /// Returns the number of conflicts detected: pending requests in the
    /// same bucket, for the same connection, with a different target state
    /// and a different component. Conflicts are counted and logged, never
    /// rejected — priority order plus the apply-time staleness check
    /// resolves them.
    pub fn push(&self, request: TransitionRequest) -> usize {
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[request.priority.index()];

        let conflicts = bucket
            .iter()
            .filter(|pending| {
                pending.connection_id == request.connection_id
                    && pending.to_state != request.to_state
                    && pending.component != request.component
            })
            .count();
        if conflicts > 0 {
            counter!(COORDINATOR_CONFLICTS_TOTAL).increment(conflicts as u64);
            warn!(
                connection_id = %request.connection_id,
                component = %request.component,
                to_state = %request.to_state,
                priority = %request.priority,
                conflicts,
                "conflicting transition requests pending at same priority"
            );
        }

        bucket.push_back(request);
        conflicts
    }

    /// Pop the oldest request from one bucket.
    pub fn pop(&self, priority: TransitionPriority) -> Option<TransitionRequest> {
        self.buckets.lock()[priority.index()].pop_front()
    }

    /// Drop every pending request for a connection, across all buckets.
    /// Returns how many were dropped.
    pub fn purge_connection(&self, connection_id: &ConnectionId) -> usize {
        let mut buckets = self.buckets.lock();
        let mut purged = 0;
        for bucket in buckets.iter_mut() {
            let before = bucket.len();
            bucket.retain(|pending| pending.connection_id != *connection_id);
            purged += before - bucket.len();
        }
        purged
    }

    /// Snapshot of per-bucket lengths.
    #[must_use]
    pub fn depths(&self) -> QueueDepths {
        let buckets = self.buckets.lock();
        QueueDepths {
            background: buckets[TransitionPriority::Background.index()].len(),
            low: buckets[TransitionPriority::Low.index()].len(),
            normal: buckets[TransitionPriority::Normal.index()].len(),
            high: buckets[TransitionPriority::High.index()].len(),
            critical: buckets[TransitionPriority::Critical.index()].len(),
        }
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}
