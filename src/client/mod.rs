//! Client side of a multiplexed WebSocket link.
//!
//! A [`ClientConnection`] owns its services, a dedicated I/O thread and the
//! queues between them. The application drives it by calling
//! [`ClientConnection::update`] once per tick; message handlers and
//! [`ConnectionEvents`] callbacks only ever run inside that call.

mod builder;
mod config;
mod connection;
mod error;
mod handle;
mod hooks;
mod runtime;

pub use builder::ClientConnectionBuilder;
pub use config::ClientConfig;
pub use connection::{ClientConnection, ConnectOptions};
pub use error::ConnectError;
pub use handle::ConnectionHandle;
pub use hooks::ConnectionEvents;

#[cfg(test)]
mod tests;
