//! Cloneable handle to a client connection's shared state.

use std::sync::Arc;

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::{
    batch::{Accumulator, OutgoingMessage},
    profiler::Profiler,
    service::MessageRoute,
    stats::{ConnectionStats, ConnectionStatus},
};

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) stats: Arc<ConnectionStats>,
    pub(crate) accumulator: Arc<Accumulator>,
    pub(crate) profiler: Arc<Profiler>,
}

/// Handle passed to client message handlers and event callbacks.
///
/// It can send on the connection and read its state, but cannot drive it;
/// that stays with the owning [`ClientConnection`](super::ClientConnection).
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub(crate) shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub(crate) fn new(label: String, max_send_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                stats: Arc::new(ConnectionStats::new(label)),
                accumulator: Arc::new(Accumulator::new(max_send_size)),
                profiler: Arc::new(Profiler::default()),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus { self.shared.stats.status() }

    /// Counters, checksums and the disconnect reason.
    #[must_use]
    pub fn stats(&self) -> &ConnectionStats { &self.shared.stats }

    /// Sticky disconnect reason of the current or last attempt.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<String> { self.shared.stats.disconnect_reason() }

    /// Start a message on `route`.
    ///
    /// Messages begun while connecting are queued until the handshake
    /// completes; `end()` fails with
    /// [`SendError::NotConnected`](crate::batch::SendError::NotConnected)
    /// while disconnected.
    pub fn begin_message(&self, route: MessageRoute) -> OutgoingMessage {
        OutgoingMessage::new(
            route,
            vec![Arc::clone(&self.shared.accumulator)],
            Arc::clone(&self.shared.profiler),
            true,
        )
    }

    /// Hand accumulated messages to the I/O thread now.
    pub fn flush(&self) { self.shared.accumulator.flush(); }

    /// Close gracefully, delivering `reason` to the server.
    ///
    /// Returns `false` when there is nothing to close.
    pub fn disconnect(&self, reason: &str) -> bool {
        if !self.shared.accumulator.is_attached() {
            return false;
        }
        self.shared.stats.reason().set(reason);
        self.shared.accumulator.close(CloseCode::Normal, reason);
        true
    }
}
