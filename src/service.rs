//! Services, message types, and dispatch of decoded sub-messages.
//!
//! A [`ServiceRegistry`] is assembled once, before a connection or session
//! manager exists, and then owned by it. Lookups by id go through dense
//! 256-slot tables; lookups by name go through a `HashMap`. The registry is
//! generic over the context `P` handed to handlers: a
//! [`ConnectionHandle`](crate::client::ConnectionHandle) on the client and a
//! [`SessionContext`](crate::server::SessionContext) on the server.

mod error;

use std::{collections::HashMap, fmt};

pub use error::{InvalidMessage, RegistrationError};
use log::debug;

use crate::{
    codec::{MessageReader, SubMessage, SubMessages, sub_message_len},
    profiler::Profiler,
};

/// Number of slots in an id table; index 0 is reserved.
const SLOTS: usize = 256;

/// Receive handler for one message type.
///
/// Handlers run on the thread calling `update()`, never on the I/O thread.
/// Returning `Err` escalates to a protocol error that closes the connection
/// or session the message arrived on.
pub type Handler<P> =
    Box<dyn FnMut(&P, &mut MessageReader<'_>) -> Result<(), InvalidMessage> + Send>;

/// Hook run when the owning connection or manager is disposed.
pub type DisposeHook = Box<dyn FnOnce() + Send>;

/// Address of a message type: service id and message id, both non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageRoute {
    /// Service identifier.
    pub service: u8,
    /// Message type identifier within the service.
    pub message: u8,
}

impl MessageRoute {
    /// Route to `message` within `service`.
    #[must_use]
    pub const fn new(service: u8, message: u8) -> Self { Self { service, message } }

    /// Returns `true` when neither id is the reserved value 0.
    #[must_use]
    pub const fn is_valid(self) -> bool { self.service != 0 && self.message != 0 }
}

impl fmt::Display for MessageRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.message)
    }
}

fn checked_id(id: u32) -> Option<u8> { u8::try_from(id).ok().filter(|id| *id != 0) }

struct MessageType<P> {
    name: String,
    handler: Option<Handler<P>>,
}

/// A named, numbered channel with its own message-type namespace.
pub struct Service<P> {
    name: String,
    id: u8,
    types: Vec<Option<MessageType<P>>>,
    by_name: HashMap<String, u8>,
    on_dispose: Option<DisposeHook>,
}

impl<P> fmt::Debug for Service<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("message_types", &self.by_name.len())
            .field("on_dispose", &self.on_dispose.as_ref().map(|_| "Some(<hook>)"))
            .finish()
    }
}

impl<P> Service<P> {
    /// Create a service named `name` with identifier `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidServiceId`] unless `id` is in
    /// `1..=255`.
    pub fn new(name: impl Into<String>, id: u32) -> Result<Self, RegistrationError> {
        let id = checked_id(id).ok_or(RegistrationError::InvalidServiceId { id })?;
        Ok(Self {
            name: name.into(),
            id,
            types: std::iter::repeat_with(|| None).take(SLOTS).collect(),
            by_name: HashMap::new(),
            on_dispose: None,
        })
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Service identifier.
    #[must_use]
    pub fn id(&self) -> u8 { self.id }

    /// Register a message type, with or without a receive handler.
    ///
    /// Messages for a type registered without a handler are dropped.
    ///
    /// # Errors
    ///
    /// Fails when `id` is outside `1..=255` or when the id or name is already
    /// taken within this service.
    pub fn register_message_type(
        &mut self,
        name: impl Into<String>,
        id: u32,
        handler: Option<Handler<P>>,
    ) -> Result<MessageRoute, RegistrationError> {
        let name = name.into();
        let slot = checked_id(id).ok_or_else(|| RegistrationError::InvalidMessageId {
            service: self.name.clone(),
            id,
        })?;
        if let Some(existing) = &self.types[usize::from(slot)] {
            return Err(RegistrationError::DuplicateMessageId {
                service: self.name.clone(),
                id: slot,
                existing: existing.name.clone(),
            });
        }
        if self.by_name.contains_key(&name) {
            return Err(RegistrationError::DuplicateMessageName {
                service: self.name.clone(),
                name,
            });
        }
        self.by_name.insert(name.clone(), slot);
        self.types[usize::from(slot)] = Some(MessageType { name, handler });
        Ok(MessageRoute::new(self.id, slot))
    }

    /// Builder-style registration of a message type with a handler.
    ///
    /// # Errors
    ///
    /// See [`register_message_type`](Self::register_message_type).
    pub fn with_handler<F>(
        mut self,
        name: impl Into<String>,
        id: u32,
        handler: F,
    ) -> Result<Self, RegistrationError>
    where
        F: FnMut(&P, &mut MessageReader<'_>) -> Result<(), InvalidMessage> + Send + 'static,
    {
        self.register_message_type(name, id, Some(Box::new(handler)))?;
        Ok(self)
    }

    /// Builder-style registration of a send-only message type.
    ///
    /// # Errors
    ///
    /// See [`register_message_type`](Self::register_message_type).
    pub fn with_message(mut self, name: impl Into<String>, id: u32) -> Result<Self, RegistrationError> {
        self.register_message_type(name, id, None)?;
        Ok(self)
    }

    /// Run `hook` when the owner is disposed.
    #[must_use]
    pub fn on_dispose(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_dispose = Some(Box::new(hook));
        self
    }

    /// Route of the message type called `name`.
    #[must_use]
    pub fn route(&self, name: &str) -> Option<MessageRoute> {
        self.by_name
            .get(name)
            .map(|message| MessageRoute::new(self.id, *message))
    }

    /// Name of message type `id`.
    #[must_use]
    pub fn message_name(&self, id: u8) -> Option<&str> {
        self.types[usize::from(id)].as_ref().map(|t| t.name.as_str())
    }
}

/// What happened to a dispatched sub-message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler consumed the message.
    Handled,
    /// The message type exists but has no handler.
    NoHandler,
    /// No service is registered under the id.
    UnknownService,
    /// The service has no message type under the id.
    UnknownMessage,
}

/// The services owned by one connection or session manager.
pub struct ServiceRegistry<P> {
    slots: Vec<Option<Service<P>>>,
    by_name: HashMap<String, u8>,
    order: Vec<u8>,
}

impl<P> Default for ServiceRegistry<P> {
    fn default() -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(SLOTS).collect(),
            by_name: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<P> fmt::Debug for ServiceRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.services().map(|s| (s.id, s.name.as_str())))
            .finish()
    }
}

impl<P> ServiceRegistry<P> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Add `service`.
    ///
    /// # Errors
    ///
    /// Fails when the service id or name is already registered.
    pub fn register_service(&mut self, service: Service<P>) -> Result<(), RegistrationError> {
        let id = service.id;
        if let Some(existing) = &self.slots[usize::from(id)] {
            return Err(RegistrationError::DuplicateServiceId {
                id,
                existing: existing.name.clone(),
            });
        }
        if self.by_name.contains_key(&service.name) {
            return Err(RegistrationError::DuplicateServiceName { name: service.name });
        }
        self.by_name.insert(service.name.clone(), id);
        self.slots[usize::from(id)] = Some(service);
        self.order.push(id);
        Ok(())
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize { self.order.len() }

    /// Returns `true` when no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    /// Services in registration order.
    pub fn services(&self) -> impl Iterator<Item = &Service<P>> {
        self.order
            .iter()
            .filter_map(|id| self.slots[usize::from(*id)].as_ref())
    }

    /// Service registered under `id`.
    #[must_use]
    pub fn service(&self, id: u8) -> Option<&Service<P>> { self.slots[usize::from(id)].as_ref() }

    /// Service registered under `name`.
    #[must_use]
    pub fn service_by_name(&self, name: &str) -> Option<&Service<P>> {
        self.by_name.get(name).and_then(|id| self.service(*id))
    }

    /// Look up a route by service and message type names.
    #[must_use]
    pub fn resolve(&self, service: &str, message: &str) -> Option<MessageRoute> {
        self.service_by_name(service)?.route(message)
    }

    /// Names of the service and message type behind `route`.
    #[must_use]
    pub fn names(&self, route: MessageRoute) -> Option<(&str, &str)> {
        let service = self.service(route.service)?;
        Some((service.name(), service.message_name(route.message)?))
    }

    /// Route one sub-message to its handler.
    ///
    /// Unknown ids and handler-less types are dropped and logged at `debug`.
    ///
    /// # Errors
    ///
    /// Propagates the handler's [`InvalidMessage`].
    pub fn dispatch(&mut self, context: &P, message: &SubMessage<'_>) -> Result<Dispatch, InvalidMessage> {
        let Some(service) = self.slots[usize::from(message.service)].as_mut() else {
            debug!("dropping message for unknown service {}", message.service);
            return Ok(Dispatch::UnknownService);
        };
        let Some(message_type) = service.types[usize::from(message.message)].as_mut() else {
            debug!(
                "dropping unknown message {} for service {}",
                message.message, service.name
            );
            return Ok(Dispatch::UnknownMessage);
        };
        let Some(handler) = message_type.handler.as_mut() else {
            return Ok(Dispatch::NoHandler);
        };
        let mut reader = message.reader();
        handler(context, &mut reader).map_err(|err| {
            err.within(&service.name, &message_type.name)
        })?;
        Ok(Dispatch::Handled)
    }

    /// Split an outer message and dispatch each sub-message in order.
    ///
    /// Received sub-messages are tallied on `profiler` before dispatch.
    /// Returns the protocol error that should close the link, if any;
    /// sub-messages after the failing one are not dispatched.
    pub(crate) fn dispatch_batch(
        &mut self,
        context: &P,
        outer: &[u8],
        profiler: &Profiler,
    ) -> Result<(), String> {
        for item in SubMessages::new(outer) {
            let message = item.map_err(|err| err.to_string())?;
            profiler.record_received(
                MessageRoute::new(message.service, message.message),
                sub_message_len(message.payload.len()) as u64,
            );
            self.dispatch(context, &message)
                .map_err(|err| err.to_string())?;
        }
        Ok(())
    }

    /// Run dispose hooks in reverse registration order and empty the
    /// registry.
    pub fn dispose(&mut self) {
        while let Some(id) = self.order.pop() {
            if let Some(service) = self.slots[usize::from(id)].take() {
                debug!("disposing service {}", service.name);
                if let Some(hook) = service.on_dispose {
                    hook();
                }
            }
        }
        self.by_name.clear();
    }
}
