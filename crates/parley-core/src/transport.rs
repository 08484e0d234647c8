//! Transport seam between the coordination layer and the realtime edge.
//!
//! The coordinator and the event emitters never touch a socket directly.
//! They hand serialized frames to a [`ConnectionTransport`], implemented by
//! the embedding server (one per live connection) and by in-memory fakes in
//! tests. The trait is deliberately tiny: deliver one text frame, and answer
//! whether the underlying connection still exists.

use async_trait::async_trait;

/// Errors surfaced by a [`ConnectionTransport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is gone; no frame can ever be delivered again.
    #[error("transport closed")]
    Closed,

    /// Delivery failed (backpressure, I/O error); the connection may survive.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Outbound frame delivery for one realtime connection.
///
/// Implementors must be `Send + Sync`: the heartbeat loop and the emitters
/// call from separate tasks. A send error never panics the caller — the
/// heartbeat treats it as an immediate liveness failure, the emitters as a
/// failed delivery.
#[async_trait]
pub trait ConnectionTransport: Send + Sync {
    /// Deliver one serialized text frame to the client.
    async fn send_text(&self, payload: &str) -> Result<(), TransportError>;

    /// Liveness predicate: whether the underlying connection still exists.
    ///
    /// Consulted by the heartbeat loop each cycle; a `false` answer stops
    /// monitoring without firing the timeout path.
    fn is_connected(&self) -> bool;
}
