//! Server side of multiplexed WebSocket links.
//!
//! A [`SessionManager`] listens on a TCP port, upgrades each connection to
//! a WebSocket after running its approval hook, and tracks one
//! [`ClientSession`] per accepted client. As on the client, socket work runs
//! on a dedicated I/O thread while handlers and [`SessionEvents`] callbacks
//! run inside [`SessionManager::update`].

mod builder;
mod config;
mod error;
mod events;
mod manager;
mod runtime;
mod session;

pub use builder::SessionManagerBuilder;
pub use config::ServerConfig;
pub use error::ListenError;
pub use events::SessionEvents;
pub use manager::{ManagerHandle, Recipients, SessionContext, SessionManager};
pub use runtime::BackoffConfig;
pub use session::ClientSession;

#[cfg(test)]
mod tests;
