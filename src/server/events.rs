//! Notifications raised by a session manager.

use super::SessionContext;
use crate::stats::ConnectionStatus;

/// Receiver for per-session notifications.
///
/// Callbacks run inside [`SessionManager::update`](super::SessionManager::update).
/// A session reported as `Disconnected` has already left the manager's
/// session list, but its context can still be read.
pub trait SessionEvents: Send {
    /// A session moved to `status`.
    fn on_client_status_changed(&mut self, context: &SessionContext, status: ConnectionStatus) {
        let _ = (context, status);
    }

    /// A session violated the protocol and is being closed.
    fn on_protocol_error(&mut self, context: &SessionContext, reason: &str) {
        let _ = (context, reason);
    }
}

impl SessionEvents for () {}
