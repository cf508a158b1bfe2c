//! The session manager and the handles passed to server-side handlers.

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use dashmap::DashMap;
use tokio::{net::TcpListener, sync::mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::{
    ClientSession,
    ListenError,
    ServerConfig,
    SessionEvents,
    SessionManagerBuilder,
    runtime::{ListenContext, ServerEvent, accept_loop},
};
use crate::{
    batch::{Accumulator, OutgoingMessage, SendError},
    io_thread::IoThread,
    link::LinkEvent,
    login::ApprovalHook,
    metrics::{self, Side},
    profiler::{ProfileReport, Profiler},
    registry::{ConnectionId, NetworkRegistry},
    service::{MessageRoute, ServiceRegistry},
    stats::{ConnectionStatus, TrafficCounters, TrafficSnapshot},
};

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) sessions: DashMap<ConnectionId, Arc<ClientSession>>,
    pub(crate) profiler: Arc<Profiler>,
    pub(crate) totals: Arc<TrafficCounters>,
    pub(crate) network: Arc<NetworkRegistry>,
}

/// Who a broadcast goes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipients {
    /// Every connected session.
    All,
    /// A single session; `end()` fails if it is gone.
    One(ConnectionId),
    /// The listed sessions that are still connected.
    List(Vec<ConnectionId>),
    /// Every connected session except one.
    AllExcept(ConnectionId),
}

/// Cloneable handle to a session manager's shared state.
#[derive(Clone, Debug)]
pub struct ManagerHandle {
    pub(crate) shared: Arc<Shared>,
}

impl ManagerHandle {
    /// Start a message on `route` for `recipients`.
    ///
    /// The payload is framed once per recipient when `end()` runs; sessions
    /// that disconnected in between are skipped.
    pub fn begin_message(&self, route: MessageRoute, recipients: Recipients) -> OutgoingMessage {
        let sessions = &self.shared.sessions;
        let pick = |id: &ConnectionId| sessions.get(id).map(|s| Arc::clone(&s.accumulator));
        let (targets, fail_if_unsent): (Vec<Arc<Accumulator>>, bool) = match recipients {
            Recipients::All => (
                sessions.iter().map(|s| Arc::clone(&s.accumulator)).collect(),
                false,
            ),
            Recipients::One(id) => (pick(&id).into_iter().collect(), true),
            Recipients::List(ids) => (ids.iter().filter_map(pick).collect(), false),
            Recipients::AllExcept(excluded) => (
                sessions
                    .iter()
                    .filter(|s| *s.key() != excluded)
                    .map(|s| Arc::clone(&s.accumulator))
                    .collect(),
                false,
            ),
        };
        OutgoingMessage::new(
            route,
            targets,
            Arc::clone(&self.shared.profiler),
            fail_if_unsent,
        )
    }

    /// Connected session with `id`.
    #[must_use]
    pub fn client(&self, id: ConnectionId) -> Option<Arc<ClientSession>> {
        self.shared.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Every connected session, ordered by id.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<ClientSession>> {
        let mut clients: Vec<_> = self.shared.sessions.iter().map(|s| Arc::clone(s.value())).collect();
        clients.sort_by_key(|s| s.id());
        clients
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn client_count(&self) -> usize { self.shared.sessions.len() }

    /// Close session `id` gracefully with `reason`.
    ///
    /// Returns `false` if no such session is connected.
    pub fn disconnect_client(&self, id: ConnectionId, reason: &str) -> bool {
        self.client(id).is_some_and(|session| session.disconnect(reason))
    }

    /// Traffic summed over every session this manager has served.
    #[must_use]
    pub fn totals(&self) -> TrafficSnapshot { self.shared.totals.snapshot() }

    /// Hand every session's accumulated messages to the I/O thread now.
    pub fn flush(&self) {
        for session in self.shared.sessions.iter() {
            session.accumulator.flush();
        }
    }
}

/// What a server-side handler or event callback receives.
#[derive(Clone, Debug)]
pub struct SessionContext {
    session: Arc<ClientSession>,
    manager: ManagerHandle,
}

impl SessionContext {
    /// The session the message or event belongs to.
    #[must_use]
    pub fn session(&self) -> &Arc<ClientSession> { &self.session }

    /// The owning manager.
    #[must_use]
    pub fn manager(&self) -> &ManagerHandle { &self.manager }

    /// Start a message to this session only.
    pub fn reply(&self, route: MessageRoute) -> OutgoingMessage {
        self.manager.begin_message(route, Recipients::One(self.session.id()))
    }
}

/// Accepts clients and multiplexes services over their links.
///
/// Like [`ClientConnection`](crate::client::ClientConnection), all I/O
/// happens on a dedicated thread and the owner calls
/// [`update`](Self::update) each tick to run handlers and callbacks.
pub struct SessionManager {
    pub(super) config: ServerConfig,
    pub(super) handle: ManagerHandle,
    pub(super) services: ServiceRegistry<SessionContext>,
    pub(super) events: Box<dyn SessionEvents>,
    pub(super) approval: ApprovalHook,
    pub(super) events_tx: mpsc::UnboundedSender<ServerEvent>,
    pub(super) events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    pub(super) io: Option<(IoThread, SocketAddr)>,
    pub(super) disposed: bool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("local_addr", &self.local_addr())
            .field("clients", &self.client_count())
            .field("services", &self.services)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Start configuring a manager.
    #[must_use]
    pub fn builder() -> SessionManagerBuilder { SessionManagerBuilder::new() }

    /// Listen on every interface at `port`; 0 picks a free port.
    ///
    /// # Errors
    ///
    /// See [`begin_listen_on`](Self::begin_listen_on).
    pub fn begin_listen(&mut self, port: u16) -> Result<SocketAddr, ListenError> {
        self.begin_listen_on(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    /// Bind `addr` and start accepting clients in the background.
    ///
    /// The socket is bound before this returns, so the returned address is
    /// ready for connections.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError`] if the manager is already listening or
    /// disposed, or if binding or starting the I/O thread fails.
    pub fn begin_listen_on(&mut self, addr: SocketAddr) -> Result<SocketAddr, ListenError> {
        if self.disposed {
            return Err(ListenError::Disposed);
        }
        if let Some((_, local)) = &self.io {
            return Err(ListenError::AlreadyListening(*local));
        }
        let bind_err = |source| ListenError::Bind { addr, source };
        let std_listener = StdTcpListener::bind(addr).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = std_listener.local_addr().map_err(bind_err)?;

        let ctx = Arc::new(ListenContext {
            shared: Arc::clone(&self.handle.shared),
            config: self.config,
            approval: Arc::clone(&self.approval),
            events: self.events_tx.clone(),
        });
        let io = IoThread::spawn("muxframe-server", move |shutdown| async move {
            let listener = match TcpListener::from_std(std_listener) {
                Ok(listener) => Arc::new(listener),
                Err(err) => {
                    error!(error = %err, "failed to register listener");
                    return;
                }
            };
            let tracker = TaskTracker::new();
            accept_loop(listener, ctx, shutdown, tracker.clone()).await;
            tracker.close();
            tracker.wait().await;
        })?;
        info!(%local_addr, "listening");
        self.io = Some((io, local_addr));
        Ok(local_addr)
    }

    /// Bound address while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.io.as_ref().map(|(_, addr)| *addr) }

    /// Whether the listener thread is still accepting clients.
    ///
    /// Turns `false` if the listener stopped on its own after a successful
    /// `begin_listen`.
    #[must_use]
    pub fn is_listening(&self) -> bool { self.io.as_ref().is_some_and(|(io, _)| !io.is_finished()) }

    /// Deliver pending events and messages, then flush every session.
    ///
    /// A handler error closes only the session that sent the message and
    /// discards the rest of its inbound traffic.
    pub fn update(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                ServerEvent::Status(session, status) => {
                    let context = self.context(session);
                    self.events.on_client_status_changed(&context, status);
                }
                ServerEvent::Link(session, LinkEvent::ProtocolError(reason)) => {
                    let context = self.context(session);
                    self.events.on_protocol_error(&context, &reason);
                }
                ServerEvent::Link(session, LinkEvent::Message(bytes)) => {
                    if session.has_failed() {
                        continue;
                    }
                    let context = self.context(session);
                    let profiler = Arc::clone(&self.handle.shared.profiler);
                    if let Err(reason) = self.services.dispatch_batch(&context, &bytes, &profiler) {
                        self.fail(&context, &reason);
                    }
                }
            }
        }
        self.handle.flush();
    }

    fn context(&self, session: Arc<ClientSession>) -> SessionContext {
        SessionContext {
            session,
            manager: self.handle.clone(),
        }
    }

    fn fail(&mut self, context: &SessionContext, reason: &str) {
        let session = context.session();
        if !session.mark_failed() {
            return;
        }
        warn!(session = %session.id(), %reason, "protocol error");
        metrics::inc_protocol_errors(Side::Server);
        session.close(CloseCode::Protocol, reason);
        self.events.on_protocol_error(context, reason);
    }

    /// Shared handle usable outside handlers.
    #[must_use]
    pub fn handle(&self) -> &ManagerHandle { &self.handle }

    /// See [`ManagerHandle::begin_message`].
    pub fn begin_message(&self, route: MessageRoute, recipients: Recipients) -> OutgoingMessage {
        self.handle.begin_message(route, recipients)
    }

    /// Start a broadcast on the route named `service`/`message`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::InvalidRoute`] with a zero route when either
    /// name is unknown.
    pub fn begin_named(
        &self,
        service: &str,
        message: &str,
        recipients: Recipients,
    ) -> Result<OutgoingMessage, SendError> {
        self.resolve(service, message)
            .map(|route| self.begin_message(route, recipients))
            .ok_or(SendError::InvalidRoute(MessageRoute::new(0, 0)))
    }

    /// Hand every session's accumulated messages to the I/O thread now.
    pub fn flush(&self) { self.handle.flush(); }

    /// Number of connected sessions.
    #[must_use]
    pub fn client_count(&self) -> usize { self.handle.client_count() }

    /// Every connected session, ordered by id.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<ClientSession>> { self.handle.clients() }

    /// See [`ManagerHandle::disconnect_client`].
    pub fn disconnect_client(&self, id: ConnectionId, reason: &str) -> bool {
        self.handle.disconnect_client(id, reason)
    }

    /// Traffic summed over every session this manager has served.
    #[must_use]
    pub fn totals(&self) -> TrafficSnapshot { self.handle.totals() }

    /// Registry listing this manager's live sessions.
    #[must_use]
    pub fn network_registry(&self) -> &Arc<NetworkRegistry> { &self.handle.shared.network }

    /// Registered services.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry<SessionContext> { &self.services }

    /// Route for `service`/`message`, by name.
    #[must_use]
    pub fn resolve(&self, service: &str, message: &str) -> Option<MessageRoute> {
        self.services.resolve(service, message)
    }

    /// Begin (or restart) per-message-type accounting across all sessions.
    pub fn profiler_start(&self) { self.handle.shared.profiler.start(); }

    /// Stop accounting and return the named report.
    ///
    /// Returns `None` if the profiler was not running.
    pub fn profiler_stop(&self) -> Option<ProfileReport> {
        let snapshot = self.handle.shared.profiler.stop()?;
        let report = ProfileReport::build(snapshot, |route| self.services.names(route));
        let totals = report.totals();
        info!(
            routes = report.messages.len(),
            sent_bytes = totals.sent_bytes,
            received_bytes = totals.received_bytes,
            "profile report"
        );
        Some(report)
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool { self.disposed }

    /// Stop listening, close every session and dispose every service.
    ///
    /// Waits at most `dispose_timeout` for the I/O thread. Undelivered
    /// events are dropped. Calling this more than once has no further effect.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some((io, local_addr)) = self.io.take()
            && !io.shutdown(self.config.dispose_timeout)
        {
            warn!(%local_addr, "I/O thread did not stop in time");
        }
        let shared = &self.handle.shared;
        for entry in shared.sessions.iter() {
            let session = entry.value();
            session.stats.reason().set("connection disposed");
            session.accumulator.detach();
            session.stats.set_status(ConnectionStatus::Disconnected);
            shared.network.remove(&session.id());
        }
        shared.sessions.clear();
        while self.events_rx.try_recv().is_ok() {}
        self.services.dispose();
        info!("session manager disposed");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) { self.dispose(); }
}
