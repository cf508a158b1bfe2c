//! The client connection object driven from the application's tick thread.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{info, warn};

use super::{
    ClientConfig,
    ClientConnectionBuilder,
    ConnectError,
    ConnectionEvents,
    ConnectionHandle,
    runtime::{self, Attempt, ClientEvent},
};
use crate::{
    batch::{OutgoingMessage, SendError},
    io_thread::IoThread,
    link::LinkEvent,
    login::LoginData,
    metrics::{self, Side},
    profiler::ProfileReport,
    registry::{ConnectionId, NetworkRegistry},
    service::{MessageRoute, ServiceRegistry},
    stats::{ConnectionStats, ConnectionStatus},
    transport::HandshakeParams,
};

/// Where and how to connect.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use muxframe::{
///     client::ConnectOptions,
///     login::{LoginData, UserRole},
/// };
///
/// let login = LoginData::new().with_user_role(&UserRole::Player).unwrap();
/// let options = ConnectOptions::new("localhost", 9000)
///     .client_version("1.2.0")
///     .login(login)
///     .keep_alive(Duration::from_secs(10));
/// assert!(options.url().starts_with("ws://localhost:9000/?ClientVersion=1.2.0"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Build identifier sent in the handshake.
    pub client_version: String,
    /// Login attributes sent in the handshake.
    pub login: LoginData,
    /// Requested keep-alive interval, rounded down to whole seconds.
    pub keep_alive: Duration,
}

impl ConnectOptions {
    /// Connect to `host:port` with an empty login and keep-alive disabled.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            login: LoginData::default(),
            keep_alive: Duration::ZERO,
        }
    }

    /// Set the client version.
    #[must_use]
    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    /// Set the login payload.
    #[must_use]
    pub fn login(mut self, login: LoginData) -> Self {
        self.login = login;
        self
    }

    /// Set the keep-alive interval.
    #[must_use]
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Handshake parameters for these options.
    #[must_use]
    pub fn handshake(&self) -> HandshakeParams {
        HandshakeParams {
            client_version: self.client_version.clone(),
            keep_alive_secs: u32::try_from(self.keep_alive.as_secs()).unwrap_or(u32::MAX),
            login: self.login.as_block().clone(),
        }
    }

    /// The handshake URL.
    #[must_use]
    pub fn url(&self) -> String { self.handshake().url(&self.host, self.port) }
}

/// A client endpoint of a multiplexed WebSocket link.
///
/// All I/O happens on a dedicated thread. The owner calls
/// [`update`](Self::update) once per tick to run message handlers and event
/// callbacks on its own thread, then flush what they wrote.
pub struct ClientConnection {
    pub(super) config: ClientConfig,
    pub(super) handle: ConnectionHandle,
    pub(super) services: ServiceRegistry<ConnectionHandle>,
    pub(super) events: Box<dyn ConnectionEvents>,
    pub(super) events_tx: mpsc::UnboundedSender<ClientEvent>,
    pub(super) events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    pub(super) io: Option<IoThread>,
    pub(super) network: Option<(Arc<NetworkRegistry>, ConnectionId)>,
    pub(super) failed: bool,
    pub(super) disposed: bool,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("label", &self.handle.stats().label())
            .field("status", &self.status())
            .field("services", &self.services)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl ClientConnection {
    /// Start configuring a connection.
    #[must_use]
    pub fn builder() -> ClientConnectionBuilder { ClientConnectionBuilder::new() }

    /// Start connecting in the background.
    ///
    /// Events left over from a previous attempt are delivered first. The
    /// outcome arrives as a status change on a later [`update`](Self::update).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Busy`] unless the connection is
    /// disconnected, [`ConnectError::Disposed`] after [`dispose`](Self::dispose),
    /// and [`ConnectError::Spawn`] if the I/O thread cannot start.
    pub fn begin_connect(&mut self, options: &ConnectOptions) -> Result<(), ConnectError> {
        if self.disposed {
            return Err(ConnectError::Disposed);
        }
        let status = self.status();
        if status != ConnectionStatus::Disconnected {
            return Err(ConnectError::Busy(status));
        }
        self.update();
        if let Some(io) = self.io.take() {
            io.shutdown(self.config.dispose_timeout);
        }

        let shared = Arc::clone(&self.handle.shared);
        shared.stats.reset();
        shared.stats.set_status(ConnectionStatus::Connecting);
        self.failed = false;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        shared.accumulator.attach(outbound_tx);
        let _ = self
            .events_tx
            .send(ClientEvent::Status(ConnectionStatus::Connecting));

        let attempt = Attempt {
            url: options.url(),
            host: options.host.clone(),
            port: options.port,
            keep_alive: Duration::from_secs(options.keep_alive.as_secs()),
            config: self.config,
            shared: Arc::clone(&shared),
            outbound: outbound_rx,
            events: self.events_tx.clone(),
        };
        let name = format!("muxframe-{}", shared.stats.label());
        match IoThread::spawn(&name, move |cancel| runtime::run(attempt, cancel)) {
            Ok(io) => {
                info!(
                    connection = %shared.stats.label(),
                    host = %options.host,
                    port = options.port,
                    "connecting"
                );
                self.io = Some(io);
                Ok(())
            }
            Err(err) => {
                shared.accumulator.detach();
                shared.stats.reason().set(&format!("failed to start I/O thread: {err}"));
                let _ = self
                    .events_tx
                    .send(ClientEvent::Status(ConnectionStatus::Disconnected));
                shared.stats.set_status(ConnectionStatus::Disconnected);
                Err(ConnectError::Spawn(err))
            }
        }
    }

    /// Deliver pending events and messages, then flush queued output.
    ///
    /// Handlers and callbacks run here, on the caller's thread. A handler
    /// error closes the connection with a protocol error and discards the
    /// rest of that attempt's inbound traffic.
    pub fn update(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                ClientEvent::Status(status) => {
                    self.events.on_status_changed(&self.handle, status);
                }
                ClientEvent::Link(LinkEvent::ProtocolError(reason)) => {
                    self.events.on_protocol_error(&self.handle, &reason);
                }
                ClientEvent::Link(LinkEvent::Message(bytes)) => {
                    if self.failed {
                        continue;
                    }
                    let profiler = Arc::clone(&self.handle.shared.profiler);
                    if let Err(reason) = self.services.dispatch_batch(&self.handle, &bytes, &profiler) {
                        self.fail(&reason);
                    }
                }
            }
        }
        self.handle.flush();
    }

    fn fail(&mut self, reason: &str) {
        warn!(connection = %self.handle.stats().label(), %reason, "protocol error");
        self.failed = true;
        metrics::inc_protocol_errors(Side::Client);
        let shared = &self.handle.shared;
        shared.stats.reason().set(reason);
        shared.accumulator.close(CloseCode::Protocol, reason);
        self.events.on_protocol_error(&self.handle, reason);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus { self.handle.status() }

    /// A cloneable handle for use outside handlers.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle { &self.handle }

    /// Counters, checksums and the disconnect reason.
    #[must_use]
    pub fn stats(&self) -> &Arc<ConnectionStats> { &self.handle.shared.stats }

    /// Sticky disconnect reason of the current or last attempt.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<String> { self.handle.disconnect_reason() }

    /// Start a message on `route`. See [`ConnectionHandle::begin_message`].
    pub fn begin_message(&self, route: MessageRoute) -> OutgoingMessage {
        self.handle.begin_message(route)
    }

    /// Start a message on the route named `service`/`message`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::InvalidRoute`] with a zero route when either
    /// name is unknown.
    pub fn begin_named(&self, service: &str, message: &str) -> Result<OutgoingMessage, SendError> {
        self.resolve(service, message)
            .map(|route| self.begin_message(route))
            .ok_or(SendError::InvalidRoute(MessageRoute::new(0, 0)))
    }

    /// Hand accumulated messages to the I/O thread now.
    pub fn flush(&self) { self.handle.flush(); }

    /// Close gracefully with `reason`. Returns `false` when disconnected.
    pub fn disconnect(&self, reason: &str) -> bool { self.handle.disconnect(reason) }

    /// Registered services.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry<ConnectionHandle> { &self.services }

    /// Route for `service`/`message`, by name.
    #[must_use]
    pub fn resolve(&self, service: &str, message: &str) -> Option<MessageRoute> {
        self.services.resolve(service, message)
    }

    /// Begin (or restart) per-message-type accounting.
    pub fn profiler_start(&self) { self.handle.shared.profiler.start(); }

    /// Stop accounting and return the named report.
    ///
    /// Returns `None` if the profiler was not running.
    pub fn profiler_stop(&self) -> Option<ProfileReport> {
        let snapshot = self.handle.shared.profiler.stop()?;
        let report = ProfileReport::build(snapshot, |route| self.services.names(route));
        let totals = report.totals();
        info!(
            connection = %self.handle.stats().label(),
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

    /// Close the link, stop the I/O thread and dispose every service.
    ///
    /// Waits at most `dispose_timeout` for the thread. Undelivered events
    /// are dropped. Calling this more than once has no further effect.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let shared = Arc::clone(&self.handle.shared);
        if shared.stats.status() != ConnectionStatus::Disconnected {
            shared.stats.reason().set("connection disposed");
        }
        if let Some(io) = self.io.take()
            && !io.shutdown(self.config.dispose_timeout)
        {
            warn!(connection = %shared.stats.label(), "I/O thread did not stop in time");
        }
        shared.accumulator.detach();
        shared.stats.set_status(ConnectionStatus::Disconnected);
        while self.events_rx.try_recv().is_ok() {}
        self.services.dispose();
        if let Some((network, id)) = self.network.take() {
            network.remove(&id);
        }
        info!(connection = %shared.stats.label(), "disposed");
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) { self.dispose(); }
}
