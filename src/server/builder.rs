//! Builder for configuring a [`SessionManager`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{
    ManagerHandle,
    ServerConfig,
    SessionContext,
    SessionEvents,
    SessionManager,
    manager::Shared,
};
use crate::{
    login::{ApprovalHook, LoginRequest, accept_all},
    profiler::Profiler,
    registry::NetworkRegistry,
    service::{RegistrationError, Service, ServiceRegistry},
    stats::TrafficCounters,
};

/// Assembles the services, callbacks and approval policy of a session
/// manager.
///
/// # Examples
///
/// ```
/// use muxframe::{
///     login::require_credentials,
///     server::{SessionContext, SessionManager},
///     service::{InvalidMessage, MessageRoute, Service},
/// };
///
/// let echo = Service::new("Echo", 1)?
///     .with_handler("Ping", 1, |ctx: &SessionContext, reader| {
///         let mut reply = ctx.reply(MessageRoute::new(1, 2));
///         reply.write_bytes(reader.read_rest());
///         reply.end().map_err(|err| InvalidMessage::new(err.to_string()))?;
///         Ok(())
///     })?
///     .with_message("Pong", 2)?;
/// let manager = SessionManager::builder()
///     .service(echo)
///     .approval(require_credentials(Some("secret".into()), None))
///     .build()?;
/// assert_eq!(manager.client_count(), 0);
/// # Ok::<(), muxframe::service::RegistrationError>(())
/// ```
pub struct SessionManagerBuilder {
    config: ServerConfig,
    services: Vec<Service<SessionContext>>,
    events: Box<dyn SessionEvents>,
    approval: ApprovalHook,
    network: Option<Arc<NetworkRegistry>>,
}

impl Default for SessionManagerBuilder {
    fn default() -> Self {
        Self {
            config: ServerConfig::default(),
            services: Vec::new(),
            events: Box::new(()),
            approval: accept_all(),
            network: None,
        }
    }
}

impl SessionManagerBuilder {
    /// Create a builder that accepts every client and has no services.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Replace the limits and timers.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a service.
    #[must_use]
    pub fn service(mut self, service: Service<SessionContext>) -> Self {
        self.services.push(service);
        self
    }

    /// Receive per-session notifications.
    #[must_use]
    pub fn events(mut self, events: impl SessionEvents + 'static) -> Self {
        self.events = Box::new(events);
        self
    }

    /// Decide which handshakes may complete.
    #[must_use]
    pub fn approval(mut self, approval: ApprovalHook) -> Self {
        self.approval = approval;
        self
    }

    /// Decide which handshakes may complete, from a closure.
    #[must_use]
    pub fn approve_with<F>(self, approve: F) -> Self
    where
        F: Fn(&LoginRequest) -> Result<(), String> + Send + Sync + 'static,
    {
        self.approval(Arc::new(approve))
    }

    /// List sessions in `registry` instead of a private one.
    #[must_use]
    pub fn network_registry(mut self, registry: Arc<NetworkRegistry>) -> Self {
        self.network = Some(registry);
        self
    }

    /// Register the services and create the manager.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if two services share an id or name.
    pub fn build(self) -> Result<SessionManager, RegistrationError> {
        let mut services = ServiceRegistry::new();
        for service in self.services {
            services.register_service(service)?;
        }
        let handle = ManagerHandle {
            shared: Arc::new(Shared {
                sessions: DashMap::new(),
                profiler: Arc::new(Profiler::default()),
                totals: Arc::new(TrafficCounters::default()),
                network: self.network.unwrap_or_default(),
            }),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(SessionManager {
            config: self.config.normalized(),
            handle,
            services,
            events: self.events,
            approval: self.approval,
            events_tx,
            events_rx,
            io: None,
            disposed: false,
        })
    }
}
