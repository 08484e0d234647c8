//! Connection coordinator: registration, transition scheduling, heartbeats.
//!
//! Producers (auth, the manager factory, event delivery, heartbeat timeouts)
//! call [`ConnectionCoordinator::request_state_transition`]; accepted requests
//! wait in priority buckets until the scheduler loop drains them, highest
//! priority first. Application happens under the connection's record lock
//! with a compare-then-apply check against the state observed at acceptance —
//! that check is the sole race-prevention mechanism. A request that lost the
//! race is discarded as stale and counted; callers needing certainty poll
//! [`ConnectionCoordinator::connection_state`].

use crate::config::CoordinatorConfig;
use crate::heartbeat::{HeartbeatMonitor, HeartbeatRecord, TimeoutHandler};
use crate::metrics::{
    COORDINATOR_CONNECTIONS_ACTIVE, COORDINATOR_REQUESTS_REJECTED_TOTAL,
    COORDINATOR_TRANSITIONS_APPLIED_TOTAL, COORDINATOR_TRANSITIONS_STALE_TOTAL,
};
use crate::queue::{PendingQueue, QueueDepths};
use crate::registry::ConnectionRegistry;
use crate::request::{TransitionRecord, TransitionRequest};
use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use parley_core::ids::{ConnectionId, UserId};
use parley_core::lifecycle::ConnectionState;
use parley_core::priority::TransitionPriority;
use parley_core::transport::ConnectionTransport;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Counter snapshot for the coordinator.
#[derive(Clone, Debug, Serialize)]
pub struct CoordinatorMetrics {
    /// Apply attempts (successful + failed).
    pub total_transitions: u64,
    /// Transitions applied.
    pub successful_transitions: u64,
    /// Apply attempts that found a stale source state or a missing record.
    pub failed_transitions: u64,
    /// Requests rejected at acceptance for an illegal edge.
    pub rejected_requests: u64,
    /// Same-priority conflicts observed at enqueue.
    pub conflicts_detected: u64,
    /// Stale requests discarded by the compare-then-apply check.
    pub races_prevented: u64,
    /// Registered connections.
    pub active_connections: usize,
    /// Pending requests per priority bucket.
    pub queue_depths: QueueDepths,
}

#[derive(Default)]
struct TransitionCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    conflicts: AtomicU64,
    races: AtomicU64,
}

/// Shared state behind the coordinator: cloned into the scheduler loop and
/// into heartbeat timeout handlers.
struct CoordinatorCore {
    config: CoordinatorConfig,
    registry: ConnectionRegistry,
    queue: PendingQueue,
    heartbeats: DashMap<ConnectionId, Arc<HeartbeatMonitor>>,
    counters: TransitionCounters,
}

impl CoordinatorCore {
    /// Validate and enqueue a transition request.
    ///
    /// Acceptance means *queued*, never *applied*: the edge is checked
    /// against the live state now, and checked again under the record lock
    /// at apply time.
    fn accept_request(
        &self,
        connection_id: ConnectionId,
        component: &str,
        to_state: ConnectionState,
        priority: TransitionPriority,
        metadata: Map<String, Value>,
    ) -> bool {
        let Some(record) = self.registry.get(&connection_id) else {
            warn!(
                connection_id = %connection_id,
                component,
                to_state = %to_state,
                "transition requested for unknown connection"
            );
            return false;
        };
        let from_state = record.lock().current_state;

        if !from_state.can_transition_to(to_state) {
            let _ = self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            counter!(COORDINATOR_REQUESTS_REJECTED_TOTAL).increment(1);
            debug!(
                connection_id = %connection_id,
                component,
                from_state = %from_state,
                to_state = %to_state,
                "illegal transition rejected"
            );
            return false;
        }

        let request = TransitionRequest::new(
            connection_id,
            component,
            from_state,
            to_state,
            priority,
            metadata,
        );
        let conflicts = self.queue.push(request);
        if conflicts > 0 {
            let _ = self
                .counters
                .conflicts
                .fetch_add(conflicts as u64, Ordering::Relaxed);
        }
        true
    }

    /// Apply one popped request under its connection's record lock.
    fn apply(&self, request: TransitionRequest) {
        let _ = self.counters.total.fetch_add(1, Ordering::Relaxed);

        let Some(record) = self.registry.get(&request.connection_id) else {
            // Unregistered between pop and apply; tolerated as a no-op.
            let _ = self.counters.failed.fetch_add(1, Ordering::Relaxed);
            debug!(
                connection_id = %request.connection_id,
                component = %request.component,
                "record gone before apply, dropping request"
            );
            return;
        };
        let mut record = record.lock();

        if record.current_state != request.from_state {
            let _ = self.counters.failed.fetch_add(1, Ordering::Relaxed);
            let _ = self.counters.races.fetch_add(1, Ordering::Relaxed);
            counter!(COORDINATOR_TRANSITIONS_STALE_TOTAL).increment(1);
            debug!(
                connection_id = %request.connection_id,
                component = %request.component,
                expected = %request.from_state,
                actual = %record.current_state,
                to_state = %request.to_state,
                "stale transition discarded"
            );
            return;
        }

        record.current_state = request.to_state;
        for (key, value) in &request.metadata {
            let _ = record.metadata.insert(key.clone(), value.clone());
        }
        let _ = record.metadata.insert(
            "last_transition".to_owned(),
            json!(Utc::now().to_rfc3339()),
        );
        let _ = record
            .metadata
            .insert("transitioned_by".to_owned(), json!(request.component));
        record.push_timeline(TransitionRecord::applied(&request));

        let _ = self.counters.successful.fetch_add(1, Ordering::Relaxed);
        counter!(COORDINATOR_TRANSITIONS_APPLIED_TOTAL).increment(1);
        debug!(
            connection_id = %request.connection_id,
            component = %request.component,
            from_state = %request.from_state,
            to_state = %request.to_state,
            priority = %request.priority,
            "transition applied"
        );
    }

    /// Scheduler loop: drain buckets highest-first, one pop per bucket per
    /// pass, with a fixed tick between passes and a periodic throttle pause.
    /// Exits only on cancellation.
    #[instrument(skip_all)]
    async fn run_scheduler(self: Arc<Self>, cancel: CancellationToken) {
        let tick = Duration::from_millis(self.config.tick_interval_ms);
        let pause = Duration::from_millis(self.config.throttle_pause_ms);
        let mut applied_since_pause: u32 = 0;

        debug!(
            tick_ms = self.config.tick_interval_ms,
            throttle_every = self.config.throttle_every,
            "scheduler started"
        );
        loop {
            for priority in TransitionPriority::descending() {
                if let Some(request) = self.queue.pop(priority) {
                    self.apply(request);
                    applied_since_pause += 1;
                    if applied_since_pause >= self.config.throttle_every {
                        applied_since_pause = 0;
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = time::sleep(pause) => {}
                        }
                    }
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = time::sleep(tick) => {}
            }
        }
    }
}

struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Coordinates lifecycle state for every registered connection.
///
/// Owned by the process composition root: construct with
/// [`ConnectionCoordinator::new`], call [`start`](ConnectionCoordinator::start)
/// once the runtime is up, and [`stop`](ConnectionCoordinator::stop) on
/// shutdown. Requests are accepted while stopped and drain on start.
pub struct ConnectionCoordinator {
    core: Arc<CoordinatorCore>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl ConnectionCoordinator {
    /// Create a coordinator. The scheduler loop is not started yet.
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            core: Arc::new(CoordinatorCore {
                config,
                registry: ConnectionRegistry::new(),
                queue: PendingQueue::new(),
                heartbeats: DashMap::new(),
                counters: TransitionCounters::default(),
            }),
            scheduler: Mutex::new(None),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the scheduler loop. `false` when already running.
    pub fn start(&self) -> bool {
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&self.core).run_scheduler(cancel.clone()));
        *slot = Some(SchedulerHandle { cancel, task });
        true
    }

    /// Cancel the scheduler loop and await its termination. `false` when
    /// not running. Pending requests stay queued.
    pub async fn stop(&self) -> bool {
        let handle = self.scheduler.lock().take();
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                if let Err(error) = handle.task.await {
                    if !error.is_cancelled() {
                        warn!(%error, "scheduler task panicked");
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Whether the scheduler loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register a connection in `Initializing`.
    ///
    /// Idempotent: `false` when already registered, and the live record is
    /// not reset. Starts no heartbeat.
    pub fn register_connection(
        &self,
        connection_id: ConnectionId,
        user_id: Option<UserId>,
    ) -> bool {
        let registered = self.core.registry.register(connection_id.clone(), user_id);
        if registered {
            gauge!(COORDINATOR_CONNECTIONS_ACTIVE).increment(1.0);
            debug!(connection_id = %connection_id, "connection registered");
        }
        registered
    }

    /// Remove every trace of a connection: its record, pending requests,
    /// and heartbeat monitor. Idempotent; `false` when unknown.
    ///
    /// The heartbeat loop is cancelled without awaiting; an in-flight apply
    /// that already popped a request for this connection lands as a counted
    /// no-op.
    pub fn unregister_connection(&self, connection_id: &ConnectionId) -> bool {
        if let Some((_, monitor)) = self.core.heartbeats.remove(connection_id) {
            monitor.abort();
        }
        let purged = self.core.queue.purge_connection(connection_id);
        let removed = self.core.registry.remove(connection_id);
        if removed {
            gauge!(COORDINATOR_CONNECTIONS_ACTIVE).decrement(1.0);
            debug!(connection_id = %connection_id, purged, "connection unregistered");
        }
        removed
    }

    // ── Transition requests ──────────────────────────────────────────

    /// Request a lifecycle transition for a connection.
    ///
    /// Returns `false` synchronously for an unknown connection or an edge
    /// that is illegal from the currently recorded state; nothing is queued
    /// in either case. `true` means accepted into the priority bucket —
    /// application happens later on the scheduler loop and may still lose
    /// the race to a concurrent request.
    #[instrument(skip_all, fields(connection_id = %connection_id, component, to_state = %to_state))]
    pub fn request_state_transition(
        &self,
        connection_id: &ConnectionId,
        component: &str,
        to_state: ConnectionState,
        priority: TransitionPriority,
        metadata: Map<String, Value>,
    ) -> bool {
        self.core
            .accept_request(connection_id.clone(), component, to_state, priority, metadata)
    }

    /// Authentication succeeded; move toward manager creation.
    pub fn auth_succeeded(&self, connection_id: &ConnectionId) -> bool {
        let mut metadata = Map::new();
        let _ = metadata.insert("result".to_owned(), json!("auth_success"));
        self.request_state_transition(
            connection_id,
            "auth",
            ConnectionState::FactoryCreating,
            TransitionPriority::High,
            metadata,
        )
    }

    /// Authentication failed; fail the connection.
    pub fn auth_failed(&self, connection_id: &ConnectionId, reason: &str) -> bool {
        let mut metadata = Map::new();
        let _ = metadata.insert("result".to_owned(), json!("auth_failure"));
        let _ = metadata.insert("reason".to_owned(), json!(reason));
        self.request_state_transition(
            connection_id,
            "auth",
            ConnectionState::Failed,
            TransitionPriority::Critical,
            metadata,
        )
    }

    /// The per-user agent manager was created.
    pub fn manager_created(&self, connection_id: &ConnectionId) -> bool {
        let mut metadata = Map::new();
        let _ = metadata.insert("result".to_owned(), json!("manager_created"));
        self.request_state_transition(
            connection_id,
            "factory",
            ConnectionState::ManagerReady,
            TransitionPriority::High,
            metadata,
        )
    }

    /// Event delivery came up; the connection is in full service.
    pub fn event_delivery_started(&self, connection_id: &ConnectionId) -> bool {
        let mut metadata = Map::new();
        let _ = metadata.insert("result".to_owned(), json!("delivery_started"));
        self.request_state_transition(
            connection_id,
            "event_delivery",
            ConnectionState::EventDeliveryActive,
            TransitionPriority::Normal,
            metadata,
        )
    }

    /// Event delivery stopped; degrade the connection.
    pub fn event_delivery_stopped(&self, connection_id: &ConnectionId, reason: &str) -> bool {
        let mut metadata = Map::new();
        let _ = metadata.insert("result".to_owned(), json!("delivery_stopped"));
        let _ = metadata.insert("reason".to_owned(), json!(reason));
        self.request_state_transition(
            connection_id,
            "event_delivery",
            ConnectionState::Degraded,
            TransitionPriority::High,
            metadata,
        )
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Current state of a connection.
    ///
    /// Unknown ids read as `Initializing` — the neutral default preserved
    /// from the original contract; callers who need to distinguish should
    /// check registration first.
    #[must_use]
    pub fn connection_state(&self, connection_id: &ConnectionId) -> ConnectionState {
        self.core
            .registry
            .state_of(connection_id)
            .unwrap_or_default()
    }

    /// Metadata snapshot for a connection; empty for unknown ids.
    #[must_use]
    pub fn connection_metadata(&self, connection_id: &ConnectionId) -> Map<String, Value> {
        self.core
            .registry
            .metadata_of(connection_id)
            .unwrap_or_default()
    }

    /// Timeline snapshot for a connection, oldest first; empty for unknown.
    #[must_use]
    pub fn connection_timeline(&self, connection_id: &ConnectionId) -> Vec<TransitionRecord> {
        self.core
            .registry
            .timeline_of(connection_id)
            .unwrap_or_default()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn active_connection_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Counter snapshot. Observers may trail the scheduler slightly.
    #[must_use]
    pub fn metrics(&self) -> CoordinatorMetrics {
        let counters = &self.core.counters;
        CoordinatorMetrics {
            total_transitions: counters.total.load(Ordering::Relaxed),
            successful_transitions: counters.successful.load(Ordering::Relaxed),
            failed_transitions: counters.failed.load(Ordering::Relaxed),
            rejected_requests: counters.rejected.load(Ordering::Relaxed),
            conflicts_detected: counters.conflicts.load(Ordering::Relaxed),
            races_prevented: counters.races.load(Ordering::Relaxed),
            active_connections: self.core.registry.len(),
            queue_depths: self.core.queue.depths(),
        }
    }

    // ── Heartbeats ───────────────────────────────────────────────────

    /// Start heartbeat monitoring for a registered connection.
    ///
    /// On timeout the coordinator first requests a `Failed` transition at
    /// `Critical` priority through the ordinary queue (no bypass), then
    /// invokes the caller's handler. `false` for unregistered connections
    /// or an already-running monitor.
    pub fn start_heartbeat(
        &self,
        connection_id: &ConnectionId,
        transport: Arc<dyn ConnectionTransport>,
        on_timeout: TimeoutHandler,
    ) -> bool {
        if !self.core.registry.contains(connection_id) {
            warn!(connection_id = %connection_id, "heartbeat requested for unknown connection");
            return false;
        }

        let monitor = self
            .core
            .heartbeats
            .entry(connection_id.clone())
            .or_insert_with(|| {
                Arc::new(HeartbeatMonitor::new(
                    connection_id.clone(),
                    self.core.config.heartbeat,
                ))
            })
            .clone();

        let core = Arc::clone(&self.core);
        let monitor_in_handler = Arc::clone(&monitor);
        let composite: TimeoutHandler = Box::new(move |id: ConnectionId| {
            let mut metadata = Map::new();
            let _ = metadata.insert("reason".to_owned(), json!("heartbeat_timeout"));
            let _ = metadata.insert("missed".to_owned(), json!(monitor_in_handler.missed_heartbeats()));
            let _ = core.accept_request(
                id.clone(),
                "heartbeat",
                ConnectionState::Failed,
                TransitionPriority::Critical,
                metadata,
            );
            on_timeout(id);
        });

        monitor.start(transport, composite)
    }

    /// Stop and discard a connection's heartbeat monitor, awaiting
    /// termination. `false` when no monitor exists.
    pub async fn stop_heartbeat(&self, connection_id: &ConnectionId) -> bool {
        match self.core.heartbeats.remove(connection_id) {
            Some((_, monitor)) => monitor.stop().await,
            None => false,
        }
    }

    /// Stop every heartbeat monitor (shutdown path). Returns how many loops
    /// were actually running.
    pub async fn stop_all_heartbeats(&self) -> usize {
        let monitors: Vec<Arc<HeartbeatMonitor>> = self
            .core
            .heartbeats
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.core.heartbeats.clear();

        let results = futures::future::join_all(monitors.iter().map(|m| m.stop())).await;
        results.into_iter().filter(|stopped| *stopped).count()
    }

    /// Record a pong for a connection; returns the latency, when computable.
    pub fn record_pong(&self, connection_id: &ConnectionId) -> Option<u64> {
        self.core
            .heartbeats
            .get(connection_id)
            .and_then(|monitor| monitor.handle_pong())
    }

    /// Missed heartbeat count for a connection; 0 for unknown.
    #[must_use]
    pub fn missed_heartbeats(&self, connection_id: &ConnectionId) -> u32 {
        self.core
            .heartbeats
            .get(connection_id)
            .map_or(0, |monitor| monitor.missed_heartbeats())
    }

    /// Heartbeat bookkeeping snapshot for a connection.
    #[must_use]
    pub fn heartbeat_record(&self, connection_id: &ConnectionId) -> Option<HeartbeatRecord> {
        self.core
            .heartbeats
            .get(connection_id)
            .map(|monitor| monitor.record())
    }
}

impl Default for ConnectionCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
