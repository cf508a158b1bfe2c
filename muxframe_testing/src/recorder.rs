//! Event sinks that remember every callback they receive.

use std::sync::Arc;

use muxframe::{
    client::{ConnectionEvents, ConnectionHandle},
    registry::ConnectionId,
    server::{SessionContext, SessionEvents},
    stats::ConnectionStatus,
};
use parking_lot::Mutex;

/// A client callback as observed by [`ClientRecorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientRecord {
    /// Status change, with the disconnect reason known at the time.
    Status(ConnectionStatus, Option<String>),
    /// Protocol error reported for the connection.
    ProtocolError(String),
}

/// A server callback as observed by [`ServerRecorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerRecord {
    /// Status change of one session.
    Status(ConnectionId, ConnectionStatus),
    /// Protocol error attributed to one session.
    ProtocolError(ConnectionId, String),
}

/// Cloneable log of client callbacks.
///
/// Hand one clone to the connection builder and keep another to inspect.
#[derive(Clone, Debug, Default)]
pub struct ClientRecorder(Arc<Mutex<Vec<ClientRecord>>>);

impl ClientRecorder {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Everything recorded so far.
    #[must_use]
    pub fn records(&self) -> Vec<ClientRecord> { self.0.lock().clone() }

    /// Status changes only, in delivery order.
    #[must_use]
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.0
            .lock()
            .iter()
            .filter_map(|r| match r {
                ClientRecord::Status(status, _) => Some(*status),
                ClientRecord::ProtocolError(_) => None,
            })
            .collect()
    }

    /// Whether `status` has been delivered.
    #[must_use]
    pub fn saw(&self, status: ConnectionStatus) -> bool { self.statuses().contains(&status) }

    /// Reason attached to the last `Disconnected` callback.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<String> {
        self.0.lock().iter().rev().find_map(|r| match r {
            ClientRecord::Status(ConnectionStatus::Disconnected, reason) => reason.clone(),
            _ => None,
        })
    }

    /// Protocol errors reported so far.
    #[must_use]
    pub fn protocol_errors(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|r| match r {
                ClientRecord::ProtocolError(reason) => Some(reason.clone()),
                ClientRecord::Status(..) => None,
            })
            .collect()
    }
}

impl ConnectionEvents for ClientRecorder {
    fn on_status_changed(&mut self, connection: &ConnectionHandle, status: ConnectionStatus) {
        self.0
            .lock()
            .push(ClientRecord::Status(status, connection.disconnect_reason()));
    }

    fn on_protocol_error(&mut self, _connection: &ConnectionHandle, reason: &str) {
        self.0.lock().push(ClientRecord::ProtocolError(reason.to_owned()));
    }
}

/// Cloneable log of session callbacks.
#[derive(Clone, Debug, Default)]
pub struct ServerRecorder(Arc<Mutex<Vec<ServerRecord>>>);

impl ServerRecorder {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn records(&self) -> Vec<ServerRecord> { self.0.lock().clone() }

    /// Sessions that reached `status`, in delivery order.
    #[must_use]
    pub fn sessions_with(&self, status: ConnectionStatus) -> Vec<ConnectionId> {
        self.0
            .lock()
            .iter()
            .filter_map(|r| match r {
                ServerRecord::Status(id, s) if *s == status => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Sessions blamed for a protocol error.
    #[must_use]
    pub fn protocol_errors(&self) -> Vec<(ConnectionId, String)> {
        self.0
            .lock()
            .iter()
            .filter_map(|r| match r {
                ServerRecord::ProtocolError(id, reason) => Some((*id, reason.clone())),
                ServerRecord::Status(..) => None,
            })
            .collect()
    }
}

impl SessionEvents for ServerRecorder {
    fn on_client_status_changed(&mut self, context: &SessionContext, status: ConnectionStatus) {
        self.0
            .lock()
            .push(ServerRecord::Status(context.session().id(), status));
    }

    fn on_protocol_error(&mut self, context: &SessionContext, reason: &str) {
        self.0.lock().push(ServerRecord::ProtocolError(
            context.session().id(),
            reason.to_owned(),
        ));
    }
}
