//! Heartbeat ping/pong liveness monitoring.
//!
//! One [`HeartbeatMonitor`] per connection. The loop pings the transport on a
//! fixed interval, waits a short grace period, and evaluates whether a pong
//! arrived after the most recent ping. Enough consecutive misses — or any
//! ping send failure — declares the connection dead via the caller-supplied
//! timeout handler, which fires exactly once. Cancellation never fires it.

use crate::config::HeartbeatConfig;
use crate::metrics::{HEARTBEAT_PINGS_TOTAL, HEARTBEAT_PONGS_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL};
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use parley_core::ids::ConnectionId;
use parley_core::transport::ConnectionTransport;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Callback invoked exactly once when a connection is declared dead.
pub type TimeoutHandler = Box<dyn FnOnce(ConnectionId) + Send + 'static>;

/// Snapshot of one connection's heartbeat bookkeeping.
#[derive(Clone, Debug, Serialize)]
pub struct HeartbeatRecord {
    /// The monitored connection.
    pub connection_id: ConnectionId,
    /// When the most recent ping was sent.
    pub last_ping_at: Option<DateTime<Utc>>,
    /// When the most recent pong was recorded.
    pub last_pong_at: Option<DateTime<Utc>>,
    /// Consecutive ping cycles without a pong.
    pub missed_count: u32,
    /// Most recent ping-to-pong latency.
    pub latency_ms: Option<u64>,
}

#[derive(Default)]
struct Pulse {
    last_ping_at: Option<DateTime<Utc>>,
    last_pong_at: Option<DateTime<Utc>>,
    latency_ms: Option<u64>,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Liveness monitor for one connection.
pub struct HeartbeatMonitor {
    connection_id: ConnectionId,
    config: HeartbeatConfig,
    pulse: Mutex<Pulse>,
    missed: AtomicU32,
    running: AtomicBool,
    loop_handle: Mutex<Option<LoopHandle>>,
}

impl HeartbeatMonitor {
    /// Create a monitor for one connection. No loop is started yet.
    #[must_use]
    pub fn new(connection_id: ConnectionId, config: HeartbeatConfig) -> Self {
        Self {
            connection_id,
            config,
            pulse: Mutex::new(Pulse::default()),
            missed: AtomicU32::new(0),
            running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        }
    }

    /// The connection this monitor watches.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Spawn the heartbeat loop. `false` when already running.
    ///
    /// `on_timeout` fires exactly once, on missed-pong timeout or on a ping
    /// send failure — never on cancellation or a dead liveness predicate.
    pub fn start(
        self: &Arc<Self>,
        transport: Arc<dyn ConnectionTransport>,
        on_timeout: TimeoutHandler,
    ) -> bool {
        let mut slot = self.loop_handle.lock();
        if self.running.load(Ordering::SeqCst) {
            debug!(connection_id = %self.connection_id, "heartbeat already running");
            return false;
        }
        self.running.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(transport, on_timeout, cancel.clone()));
        *slot = Some(LoopHandle { cancel, task });
        true
    }

    async fn run(
        self: Arc<Self>,
        transport: Arc<dyn ConnectionTransport>,
        on_timeout: TimeoutHandler,
        cancel: CancellationToken,
    ) {
        let ping_interval = Duration::from_millis(self.config.ping_interval_ms);
        let pong_grace = Duration::from_millis(self.config.pong_grace_ms);
        let mut on_timeout = Some(on_timeout);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = time::sleep(ping_interval) => {}
            }

            if !transport.is_connected() {
                debug!(connection_id = %self.connection_id, "transport gone, heartbeat exiting");
                break;
            }

            let ping_at = Utc::now();
            self.pulse.lock().last_ping_at = Some(ping_at);
            let frame = json!({
                "type": "ping",
                "timestamp": ping_at.to_rfc3339(),
            })
            .to_string();
            counter!(HEARTBEAT_PINGS_TOTAL).increment(1);

            if let Err(error) = transport.send_text(&frame).await {
                // A failed send means the socket is already dead; skip the
                // soft-miss counter and declare timeout now.
                warn!(
                    connection_id = %self.connection_id,
                    %error,
                    "ping send failed, declaring timeout"
                );
                self.declare_timeout(&mut on_timeout);
                break;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = time::sleep(pong_grace) => {}
            }

            let responded = self
                .pulse
                .lock()
                .last_pong_at
                .is_some_and(|pong| pong >= ping_at);
            if responded {
                self.missed.store(0, Ordering::SeqCst);
            } else {
                let missed = self.missed.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(connection_id = %self.connection_id, missed, "missed heartbeat");
                if missed >= self.config.max_missed {
                    warn!(
                        connection_id = %self.connection_id,
                        missed,
                        "heartbeat timeout"
                    );
                    self.declare_timeout(&mut on_timeout);
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    fn declare_timeout(&self, on_timeout: &mut Option<TimeoutHandler>) {
        counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
        if let Some(handler) = on_timeout.take() {
            handler(self.connection_id.clone());
        }
    }

    /// Record a pong from the client.
    ///
    /// Resets the missed counter and returns the ping-to-pong latency, or
    /// `None` when no ping has been sent yet.
    pub fn handle_pong(&self) -> Option<u64> {
        let now = Utc::now();
        let mut pulse = self.pulse.lock();
        pulse.last_pong_at = Some(now);
        self.missed.store(0, Ordering::SeqCst);
        counter!(HEARTBEAT_PONGS_TOTAL).increment(1);

        let ping_at = pulse.last_ping_at?;
        let latency = u64::try_from((now - ping_at).num_milliseconds().max(0)).unwrap_or(0);
        pulse.latency_ms = Some(latency);
        Some(latency)
    }

    /// Consecutive ping cycles without a pong.
    #[must_use]
    pub fn missed_heartbeats(&self) -> u32 {
        self.missed.load(Ordering::SeqCst)
    }

    /// Whether the loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the monitor's bookkeeping.
    #[must_use]
    pub fn record(&self) -> HeartbeatRecord {
        let pulse = self.pulse.lock();
        HeartbeatRecord {
            connection_id: self.connection_id.clone(),
            last_ping_at: pulse.last_ping_at,
            last_pong_at: pulse.last_pong_at,
            missed_count: self.missed.load(Ordering::SeqCst),
            latency_ms: pulse.latency_ms,
        }
    }

    /// Cancel the loop and await its termination. `false` when not running.
    /// Safe to call repeatedly; never fires the timeout handler.
    pub async fn stop(&self) -> bool {
        let handle = self.loop_handle.lock().take();
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                if let Err(error) = handle.task.await {
                    if !error.is_cancelled() {
                        warn!(connection_id = %self.connection_id, %error, "heartbeat task panicked");
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Cancel the loop without awaiting termination (unregister path).
    pub fn abort(&self) {
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.cancel.cancel();
            handle.task.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::transport::TransportError;

    struct FakeTransport {
        pings: Mutex<Vec<String>>,
        connected: AtomicBool,
        fail_sends: AtomicBool,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pings: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                fail_sends: AtomicBool::new(false),
            })
        }

        fn ping_count(&self) -> usize {
            self.pings.lock().len()
        }
    }

    #[async_trait]
    impl ConnectionTransport for FakeTransport {
        async fn send_text(&self, payload: &str) -> Result<(), TransportError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::SendFailed("injected".to_owned()));
            }
            self.pings.lock().push(payload.to_owned());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn make_monitor() -> Arc<HeartbeatMonitor> {
        Arc::new(HeartbeatMonitor::new(
            ConnectionId::from("hb-1"),
            HeartbeatConfig {
                ping_interval_ms: 100,
                pong_grace_ms: 20,
                max_missed: 3,
            },
        ))
    }

    fn counting_handler(fired: &Arc<AtomicU32>) -> TimeoutHandler {
        let fired = Arc::clone(fired);
        Box::new(move |_id| {
            let _ = fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn wait_until_stopped(monitor: &Arc<HeartbeatMonitor>) {
        tokio::time::timeout(Duration::from_secs(60), async {
            while monitor.is_running() {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("heartbeat loop should stop");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_exactly_once_after_max_missed() {
        let monitor = make_monitor();
        let transport = FakeTransport::new();
        let fired = Arc::new(AtomicU32::new(0));

        assert!(monitor.start(transport.clone(), counting_handler(&fired)));
        wait_until_stopped(&monitor).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.missed_heartbeats(), 3);
        assert_eq!(transport.ping_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_frame_is_structured() {
        let monitor = make_monitor();
        let transport = FakeTransport::new();
        let fired = Arc::new(AtomicU32::new(0));

        assert!(monitor.start(transport.clone(), counting_handler(&fired)));
        wait_until_stopped(&monitor).await;

        let pings = transport.pings.lock().clone();
        let frame: serde_json::Value = serde_json::from_str(&pings[0]).unwrap();
        assert_eq!(frame["type"], "ping");
        assert!(frame["timestamp"].as_str().unwrap().contains('T'));
    }

    #[tokio::test(start_paused = true)]
    async fn send_error_is_an_immediate_timeout() {
        let monitor = make_monitor();
        let transport = FakeTransport::new();
        transport.fail_sends.store(true, Ordering::SeqCst);
        let fired = Arc::new(AtomicU32::new(0));

        assert!(monitor.start(transport.clone(), counting_handler(&fired)));
        wait_until_stopped(&monitor).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // The soft-miss counter never advanced.
        assert_eq!(monitor.missed_heartbeats(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_liveness_predicate_exits_silently() {
        let monitor = make_monitor();
        let transport = FakeTransport::new();
        transport.connected.store(false, Ordering::SeqCst);
        let fired = Arc::new(AtomicU32::new(0));

        assert!(monitor.start(transport.clone(), counting_handler(&fired)));
        wait_until_stopped(&monitor).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(transport.ping_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_resets_missed_and_records_latency() {
        let monitor = make_monitor();
        let transport = FakeTransport::new();
        let fired = Arc::new(AtomicU32::new(0));

        assert!(monitor.start(transport.clone(), counting_handler(&fired)));

        // Answer the first two pings inside their grace windows.
        for expected in 1..=2 {
            tokio::time::timeout(Duration::from_secs(60), async {
                while transport.ping_count() < expected {
                    time::sleep(Duration::from_millis(2)).await;
                }
            })
            .await
            .expect("ping should be sent");
            let latency = monitor.handle_pong();
            assert!(latency.is_some());
        }

        assert_eq!(monitor.missed_heartbeats(), 0);
        let record = monitor.record();
        assert!(record.last_ping_at.is_some());
        assert!(record.last_pong_at.is_some());
        assert!(record.latency_ms.is_some());

        assert!(monitor.stop().await);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_prevents_the_callback() {
        let monitor = Arc::new(HeartbeatMonitor::new(
            ConnectionId::from("hb-stop"),
            HeartbeatConfig::default(),
        ));
        let transport = FakeTransport::new();
        let fired = Arc::new(AtomicU32::new(0));

        assert!(monitor.start(transport, counting_handler(&fired)));
        assert!(monitor.is_running());

        assert!(monitor.stop().await);
        assert!(!monitor.is_running());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Repeatable.
        assert!(!monitor.stop().await);
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let monitor = Arc::new(HeartbeatMonitor::new(
            ConnectionId::from("hb-once"),
            HeartbeatConfig::default(),
        ));
        let transport = FakeTransport::new();
        let fired = Arc::new(AtomicU32::new(0));

        assert!(monitor.start(transport.clone(), counting_handler(&fired)));
        assert!(!monitor.start(transport, counting_handler(&fired)));

        let _ = monitor.stop().await;
    }

    #[tokio::test]
    async fn abort_cancels_without_awaiting() {
        let monitor = Arc::new(HeartbeatMonitor::new(
            ConnectionId::from("hb-abort"),
            HeartbeatConfig::default(),
        ));
        let transport = FakeTransport::new();
        let fired = Arc::new(AtomicU32::new(0));

        assert!(monitor.start(transport, counting_handler(&fired)));
        monitor.abort();
        assert!(!monitor.is_running());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pong_without_ping_is_none() {
        let monitor = HeartbeatMonitor::new(ConnectionId::from("hb-2"), HeartbeatConfig::default());
        assert!(monitor.handle_pong().is_none());

        let record = monitor.record();
        assert!(record.last_pong_at.is_some());
        assert!(record.latency_ms.is_none());
        assert_eq!(record.missed_count, 0);
    }

    #[test]
    fn fresh_record_is_empty() {
        let monitor = HeartbeatMonitor::new(ConnectionId::from("hb-3"), HeartbeatConfig::default());
        let record = monitor.record();
        assert_eq!(record.connection_id.as_str(), "hb-3");
        assert!(record.last_ping_at.is_none());
        assert!(record.last_pong_at.is_none());
        assert!(record.latency_ms.is_none());
        assert!(!monitor.is_running());
    }
}
