//! Builder for configuring a [`ClientConnection`].

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ClientConfig, ClientConnection, ConnectionEvents, ConnectionHandle};
use crate::{
    registry::NetworkRegistry,
    service::{RegistrationError, Service, ServiceRegistry},
};

/// Assembles the services, callbacks and limits of a client connection.
///
/// Services are validated when [`build`](Self::build) runs; nothing can be
/// registered afterwards.
///
/// # Examples
///
/// ```
/// use muxframe::{client::ClientConnection, service::Service};
///
/// let chat = Service::new("Chat", 2)?.with_handler("Say", 1, |_conn, reader| {
///     let _line = reader.read_string()?;
///     Ok(())
/// })?;
/// let connection = ClientConnection::builder().label("player").service(chat).build()?;
/// assert!(connection.resolve("Chat", "Say").is_some());
/// # Ok::<(), muxframe::service::RegistrationError>(())
/// ```
pub struct ClientConnectionBuilder {
    config: ClientConfig,
    services: Vec<Service<ConnectionHandle>>,
    events: Box<dyn ConnectionEvents>,
    network: Option<Arc<NetworkRegistry>>,
    label: String,
}

impl Default for ClientConnectionBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            services: Vec::new(),
            events: Box::new(()),
            network: None,
            label: "client".to_owned(),
        }
    }
}

impl ClientConnectionBuilder {
    /// Create a builder with default limits and no services.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Replace the limits and timers.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a service.
    #[must_use]
    pub fn service(mut self, service: Service<ConnectionHandle>) -> Self {
        self.services.push(service);
        self
    }

    /// Receive status and protocol error notifications.
    #[must_use]
    pub fn events(mut self, events: impl ConnectionEvents + 'static) -> Self {
        self.events = Box::new(events);
        self
    }

    /// List the connection's stats in `registry` while it lives.
    #[must_use]
    pub fn network_registry(mut self, registry: Arc<NetworkRegistry>) -> Self {
        self.network = Some(registry);
        self
    }

    /// Name used in logs, thread names and stats.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Register the services and create the connection.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if two services share an id or name.
    pub fn build(self) -> Result<ClientConnection, RegistrationError> {
        let mut services = ServiceRegistry::new();
        for service in self.services {
            services.register_service(service)?;
        }
        let config = self.config.normalized();
        let handle = ConnectionHandle::new(self.label, config.max_send_size);
        let network = self.network.map(|registry| {
            let id = registry.register(&handle.shared.stats);
            (registry, id)
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(ClientConnection {
            config,
            handle,
            services,
            events: self.events,
            events_tx,
            events_rx,
            io: None,
            network,
            failed: false,
            disposed: false,
        })
    }
}
