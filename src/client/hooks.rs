//! Notifications raised by a client connection.
//!
//! Every callback runs inside [`ClientConnection::update`](super::ClientConnection::update)
//! on the application's tick thread, never on the I/O thread.

use super::ConnectionHandle;
use crate::stats::ConnectionStatus;

/// Receiver for client connection notifications.
///
/// Both methods default to doing nothing, so implementors override only what
/// they need.
///
/// # Examples
///
/// ```
/// use muxframe::{
///     client::{ConnectionEvents, ConnectionHandle},
///     stats::ConnectionStatus,
/// };
///
/// struct Log;
///
/// impl ConnectionEvents for Log {
///     fn on_status_changed(&mut self, connection: &ConnectionHandle, status: ConnectionStatus) {
///         if status == ConnectionStatus::Disconnected {
///             println!("lost connection: {:?}", connection.disconnect_reason());
///         }
///     }
/// }
/// ```
pub trait ConnectionEvents: Send {
    /// The connection moved to `status`.
    fn on_status_changed(&mut self, connection: &ConnectionHandle, status: ConnectionStatus) {
        let _ = (connection, status);
    }

    /// A protocol violation is closing the connection.
    fn on_protocol_error(&mut self, connection: &ConnectionHandle, reason: &str) {
        let _ = (connection, reason);
    }
}

impl ConnectionEvents for () {}
