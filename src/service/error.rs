//! Errors raised while registering services or handling their messages.

use thiserror::Error;

use crate::codec::ReadError;

/// Misuse detected while assembling a service table.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// A service id outside `1..=255`.
    #[error("service id {id} is outside 1..=255")]
    InvalidServiceId {
        /// Rejected id.
        id: u32,
    },
    /// A message id outside `1..=255`.
    #[error("message id {id} in service {service:?} is outside 1..=255")]
    InvalidMessageId {
        /// Owning service name.
        service: String,
        /// Rejected id.
        id: u32,
    },
    /// The service id is taken.
    #[error("service id {id} already registered as {existing:?}")]
    DuplicateServiceId {
        /// Contested id.
        id: u8,
        /// Name of the service holding it.
        existing: String,
    },
    /// The service name is taken.
    #[error("service name {name:?} already registered")]
    DuplicateServiceName {
        /// Contested name.
        name: String,
    },
    /// The message id is taken within its service.
    #[error("message id {id} in service {service:?} already registered as {existing:?}")]
    DuplicateMessageId {
        /// Owning service name.
        service: String,
        /// Contested id.
        id: u8,
        /// Name of the message type holding it.
        existing: String,
    },
    /// The message name is taken within its service.
    #[error("message name {name:?} already registered in service {service:?}")]
    DuplicateMessageName {
        /// Owning service name.
        service: String,
        /// Contested name.
        name: String,
    },
}

/// A handler rejected the message it was given.
///
/// Any [`ReadError`] converts into this, so handlers can use `?` on reader
/// calls directly.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct InvalidMessage {
    reason: String,
}

impl InvalidMessage {
    /// Reject a message with `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str { &self.reason }

    pub(crate) fn within(self, service: &str, message: &str) -> Self {
        Self {
            reason: format!("invalid {service}.{message}: {}", self.reason),
        }
    }
}

impl From<ReadError> for InvalidMessage {
    fn from(err: ReadError) -> Self { Self::new(err.to_string()) }
}
