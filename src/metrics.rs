//! Metric helpers for `muxframe`.
//!
//! This module defines metric names and small helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Gauge of open connections, labelled by `side`.
pub const CONNECTIONS_ACTIVE: &str = "muxframe_connections_active";
/// Counter of binary transport messages, labelled by `direction`.
pub const MESSAGES_TOTAL: &str = "muxframe_messages_total";
/// Counter of binary transport bytes, labelled by `direction`.
pub const BYTES_TOTAL: &str = "muxframe_bytes_total";
/// Counter of protocol errors, labelled by `side`.
pub const PROTOCOL_ERRORS_TOTAL: &str = "muxframe_protocol_errors_total";
/// Counter of handshakes refused by the approval hook.
pub const HANDSHAKE_REJECTIONS_TOTAL: &str = "muxframe_handshake_rejections_total";

/// Which end of a link a metric describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// An outbound client connection.
    Client,
    /// A server-side client session.
    Server,
}

impl Side {
    /// Label value for this side.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// Direction of transport traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Messages received from the peer.
    Inbound,
    /// Messages sent to the peer.
    Outbound,
}

impl Direction {
    /// Label value for this direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record one binary transport message of `bytes` bytes.
pub fn record_message(direction: Direction, bytes: usize) {
    #[cfg(feature = "metrics")]
    {
        counter!(MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
        counter!(BYTES_TOTAL, "direction" => direction.as_str()).increment(bytes as u64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (direction, bytes);
}

/// Record a protocol error on `side`.
pub fn inc_protocol_errors(side: Side) {
    #[cfg(feature = "metrics")]
    counter!(PROTOCOL_ERRORS_TOTAL, "side" => side.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = side;
}

/// Record a handshake refused by the approval hook.
pub fn inc_handshake_rejections() {
    #[cfg(feature = "metrics")]
    counter!(HANDSHAKE_REJECTIONS_TOTAL).increment(1);
}

/// Guard counting one open connection in [`CONNECTIONS_ACTIVE`] for its
/// lifetime.
#[derive(Debug)]
pub struct ActiveConnection {
    side: Side,
}

impl ActiveConnection {
    /// Increment the gauge for `side`.
    #[must_use]
    pub fn new(side: Side) -> Self {
        #[cfg(feature = "metrics")]
        gauge!(CONNECTIONS_ACTIVE, "side" => side.as_str()).increment(1.0);
        Self { side }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        #[cfg(feature = "metrics")]
        gauge!(CONNECTIONS_ACTIVE, "side" => self.side.as_str()).decrement(1.0);
        #[cfg(not(feature = "metrics"))]
        let _ = self.side;
    }
}
