//! Error types for client connections.

use std::io;

use crate::stats::ConnectionStatus;

/// Misuse of [`ClientConnection::begin_connect`](super::ClientConnection::begin_connect).
///
/// Transport failures are not reported here; they surface as the disconnect
/// reason and a status change on the next `update()`.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// A connection attempt is already in progress or established.
    #[error("connection is already {0}")]
    Busy(ConnectionStatus),
    /// The connection has been disposed.
    #[error("connection has been disposed")]
    Disposed,
    /// The I/O thread could not be started.
    #[error("failed to start I/O thread: {0}")]
    Spawn(#[from] io::Error),
}
