//! Tunables for client connections.

use std::time::Duration;

use crate::codec::sub_message_len;

/// Limits and timers applied to a [`ClientConnection`](super::ClientConnection).
///
/// # Default Values
/// - `max_send_size`: 256 KiB
/// - `max_receive_size`: 1 MiB
/// - `flush_interval`: 10 milliseconds
/// - `connect_timeout`: 10 seconds
/// - `dispose_timeout`: 500 milliseconds
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use muxframe::client::ClientConfig;
///
/// let config = ClientConfig::default()
///     .max_send_size(1024)
///     .flush_interval(Duration::ZERO)
///     .normalized();
/// assert_eq!(config.flush_interval, Duration::from_millis(1));
/// assert!(config.max_receive_size >= 1024);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Largest payload accepted by `end()`, and the size at which the
    /// accumulation buffer is flushed eagerly.
    pub max_send_size: usize,
    /// Largest binary transport message accepted from the server.
    pub max_receive_size: usize,
    /// Period of the I/O thread's flush timer.
    pub flush_interval: Duration,
    /// Upper bound on TCP connect plus WebSocket handshake.
    pub connect_timeout: Duration,
    /// How long `dispose` waits for the I/O thread.
    pub dispose_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_send_size: 256 * 1024,
            max_receive_size: 1024 * 1024,
            flush_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(10),
            dispose_timeout: Duration::from_millis(500),
        }
    }
}

impl ClientConfig {
    /// Set the maximum send size.
    #[must_use]
    pub fn max_send_size(mut self, bytes: usize) -> Self {
        self.max_send_size = bytes;
        self
    }

    /// Set the maximum receive size.
    #[must_use]
    pub fn max_receive_size(mut self, bytes: usize) -> Self {
        self.max_receive_size = bytes;
        self
    }

    /// Set the flush timer period.
    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the dispose timeout.
    #[must_use]
    pub fn dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout = timeout;
        self
    }

    /// Clamp values to workable bounds.
    ///
    /// Sizes are at least 64 bytes, the receive limit can hold one maximal
    /// sub-message, and every duration is at least one millisecond.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_send_size = self.max_send_size.max(64);
        self.max_receive_size = self
            .max_receive_size
            .max(sub_message_len(self.max_send_size));
        self.flush_interval = self.flush_interval.max(Duration::from_millis(1));
        self.connect_timeout = self.connect_timeout.max(Duration::from_millis(1));
        self.dispose_timeout = self.dispose_timeout.max(Duration::from_millis(1));
        self
    }
}
