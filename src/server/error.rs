//! Errors raised by [`SessionManager`](super::SessionManager) operations.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Reasons `begin_listen` can fail.
#[derive(Debug, Error)]
pub enum ListenError {
    /// The manager is already listening.
    #[error("already listening on {0}")]
    AlreadyListening(SocketAddr),
    /// The manager has been disposed.
    #[error("session manager has been disposed")]
    Disposed,
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The I/O thread could not be started.
    #[error("failed to start I/O thread: {0}")]
    Spawn(#[from] io::Error),
}
