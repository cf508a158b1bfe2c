//! Convenience imports for applications embedding a client or server.
//!
//! Only the high-frequency types live here. Import everything else from its
//! owning module.
//!
//! # Examples
//!
//! ```
//! use muxframe::prelude::*;
//!
//! fn chat() -> Result<Service<ConnectionHandle>, RegistrationError> {
//!     Service::new("Chat", 2)?.with_message("Say", 1)
//! }
//! # chat().unwrap();
//! ```

pub use crate::{
    batch::{OutgoingMessage, SendError},
    client::{
        ClientConfig,
        ClientConnection,
        ConnectOptions,
        ConnectionEvents,
        ConnectionHandle,
    },
    codec::{MessageReader, MessageWriter},
    login::{LoginData, UserRole},
    registry::ConnectionId,
    server::{
        ClientSession,
        Recipients,
        ServerConfig,
        SessionContext,
        SessionEvents,
        SessionManager,
    },
    service::{InvalidMessage, MessageRoute, RegistrationError, Service},
    stats::ConnectionStatus,
};
