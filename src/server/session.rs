//! Server-side state for one connected client.

use std::{
    any::Any,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::{
    batch::Accumulator,
    login::{LoginData, LoginRequest},
    registry::ConnectionId,
    stats::{ConnectionStats, ConnectionStatus},
};

#[derive(Clone, Debug, Default)]
struct User {
    id: u64,
    name: String,
}

/// One accepted client.
///
/// Sessions are shared: the manager's list, in-flight events and
/// application code may all hold the same `Arc<ClientSession>`.
pub struct ClientSession {
    id: ConnectionId,
    request: LoginRequest,
    pub(crate) stats: Arc<ConnectionStats>,
    pub(crate) accumulator: Arc<Accumulator>,
    failed: AtomicBool,
    user: Mutex<Option<User>>,
    tag: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("peer_addr", &self.request.peer_addr)
            .field("status", &self.status())
            .field("user", &*self.user.lock())
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    pub(crate) fn new(
        id: ConnectionId,
        request: LoginRequest,
        stats: Arc<ConnectionStats>,
        accumulator: Arc<Accumulator>,
    ) -> Self {
        Self {
            id,
            request,
            stats,
            accumulator,
            failed: AtomicBool::new(false),
            user: Mutex::new(None),
            tag: Mutex::new(None),
        }
    }

    /// Identifier unique within the manager's network registry.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Remote address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr { self.request.peer_addr }

    /// Client build identifier from the handshake.
    #[must_use]
    pub fn client_version(&self) -> &str { &self.request.client_version }

    /// Login attributes from the handshake.
    #[must_use]
    pub fn login(&self) -> &LoginData { &self.request.login }

    /// Negotiated keep-alive interval; zero when disabled.
    #[must_use]
    pub fn keep_alive(&self) -> Duration { self.request.keep_alive }

    /// Counters, checksums and the disconnect reason.
    #[must_use]
    pub fn stats(&self) -> &Arc<ConnectionStats> { &self.stats }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus { self.stats.status() }

    /// Record the verified identity behind this session.
    pub fn set_user(&self, user_id: u64, user_name: impl Into<String>) {
        *self.user.lock() = Some(User {
            id: user_id,
            name: user_name.into(),
        });
    }

    /// Verified user id, once set.
    #[must_use]
    pub fn user_id(&self) -> Option<u64> { self.user.lock().as_ref().map(|u| u.id) }

    /// Verified user name, once set.
    #[must_use]
    pub fn user_name(&self) -> Option<String> {
        self.user.lock().as_ref().map(|u| u.name.clone())
    }

    /// Attach application data, replacing any previous tag.
    pub fn set_tag<T: Any + Send + Sync>(&self, tag: T) { *self.tag.lock() = Some(Box::new(tag)); }

    /// Run `f` with the tag if it is a `T`.
    pub fn with_tag<T: Any + Send + Sync, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.tag.lock();
        f(guard.as_ref().and_then(|tag| tag.downcast_ref::<T>()))
    }

    /// Remove and return the tag if it is a `T`; other types stay attached.
    pub fn take_tag<T: Any + Send + Sync>(&self) -> Option<T> {
        let mut guard = self.tag.lock();
        match guard.take()?.downcast::<T>() {
            Ok(tag) => Some(*tag),
            Err(other) => {
                *guard = Some(other);
                None
            }
        }
    }

    /// Close gracefully, delivering `reason` to the client.
    ///
    /// Returns `false` if the session is already closed.
    pub fn disconnect(&self, reason: &str) -> bool { self.close(CloseCode::Normal, reason) }

    pub(crate) fn close(&self, code: CloseCode, reason: &str) -> bool {
        if !self.accumulator.is_attached() {
            return false;
        }
        self.stats.reason().set(reason);
        self.accumulator.close(code, reason);
        true
    }

    pub(crate) fn mark_failed(&self) -> bool { !self.failed.swap(true, Ordering::AcqRel) }

    pub(crate) fn has_failed(&self) -> bool { self.failed.load(Ordering::Acquire) }
}
