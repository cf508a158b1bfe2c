//! Listener thread internals for [`SessionManager`](super::SessionManager).

mod accept;
mod backoff;
mod connection;
#[cfg(test)]
mod tests;

use std::sync::Arc;

pub(super) use accept::accept_loop;
pub use backoff::BackoffConfig;
use tokio::sync::mpsc;

use super::{ClientSession, ServerConfig, manager::Shared};
use crate::{link::LinkEvent, login::ApprovalHook, stats::ConnectionStatus};

/// Work handed from the I/O thread to `update()`.
#[derive(Debug)]
pub(super) enum ServerEvent {
    Status(Arc<ClientSession>, ConnectionStatus),
    Link(Arc<ClientSession>, LinkEvent),
}

/// State every session task shares.
pub(super) struct ListenContext {
    pub(super) shared: Arc<Shared>,
    pub(super) config: ServerConfig,
    pub(super) approval: ApprovalHook,
    pub(super) events: mpsc::UnboundedSender<ServerEvent>,
}
