#![doc(html_root_url = "https://docs.rs/muxframe/latest")]
//! Service-multiplexed messaging over WebSockets.
//!
//! A [`ClientConnection`] and a [`SessionManager`] exchange binary transport
//! messages, each packing one or more sub-messages addressed to a
//! `(service, message)` route. Applications register [`Service`]s with
//! typed handlers, drive both ends from their own tick loop through
//! `update()`, and leave socket work to a dedicated I/O thread per endpoint.
//! Rolling checksums, keep-alive pings and per-route profiling come built
//! in.

pub mod attributes;
pub mod backend;
pub mod batch;
pub mod client;
pub mod codec;
pub mod control;
mod io_thread;
mod link;
pub mod login;
pub mod metrics;
pub mod panic;
pub mod prelude;
pub mod profiler;
pub mod registry;
pub mod server;
pub mod service;
pub mod stats;
pub mod transport;

pub use batch::{OutgoingMessage, SendError};
pub use client::{ClientConnection, ConnectOptions};
pub use codec::{MessageReader, MessageWriter};
pub use registry::{ConnectionId, NetworkRegistry};
pub use server::{Recipients, SessionManager};
pub use service::{MessageRoute, Service};
pub use stats::{ConnectionStats, ConnectionStatus};
