//! Tunables for a session manager.

use std::time::Duration;

use super::BackoffConfig;
use crate::codec::sub_message_len;

/// Limits and timers applied by a [`SessionManager`](super::SessionManager).
///
/// # Default Values
/// - `max_send_size`: 256 KiB
/// - `max_receive_size`: 1 MiB
/// - `flush_interval`: 10 milliseconds
/// - `handshake_timeout`: 10 seconds
/// - `dispose_timeout`: 500 milliseconds
/// - `backoff`: [`BackoffConfig::default`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Largest payload accepted by `end()`, per session buffer.
    pub max_send_size: usize,
    /// Largest binary transport message accepted from a client.
    pub max_receive_size: usize,
    /// Period of each session's flush timer.
    pub flush_interval: Duration,
    /// Time a client has to complete the WebSocket handshake.
    pub handshake_timeout: Duration,
    /// How long `dispose` waits for the I/O thread.
    pub dispose_timeout: Duration,
    /// Retry policy for failing accepts.
    pub backoff: BackoffConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_send_size: 256 * 1024,
            max_receive_size: 1024 * 1024,
            flush_interval: Duration::from_millis(10),
            handshake_timeout: Duration::from_secs(10),
            dispose_timeout: Duration::from_millis(500),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ServerConfig {
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

    /// Set the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the dispose timeout.
    #[must_use]
    pub fn dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout = timeout;
        self
    }

    /// Set the accept back-off.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Clamp values to workable bounds, as
    /// [`ClientConfig::normalized`](crate::client::ClientConfig::normalized)
    /// does, and normalize the back-off.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_send_size = self.max_send_size.max(64);
        self.max_receive_size = self
            .max_receive_size
            .max(sub_message_len(self.max_send_size));
        self.flush_interval = self.flush_interval.max(Duration::from_millis(1));
        self.handshake_timeout = self.handshake_timeout.max(Duration::from_millis(1));
        self.dispose_timeout = self.dispose_timeout.max(Duration::from_millis(1));
        self.backoff = self.backoff.normalized();
        self
    }
}
