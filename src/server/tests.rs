//! Unit tests for the session manager that need no client.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use rstest::{fixture, rstest};

use super::*;
use crate::{
    batch::{Accumulator, SendError},
    login::{LoginData, LoginRequest},
    registry::ConnectionId,
    service::{MessageRoute, Service},
    stats::{ConnectionStats, ConnectionStatus},
};

#[fixture]
fn manager() -> SessionManager { SessionManager::builder().build().expect("build manager") }

fn detached_session() -> ClientSession {
    let request = LoginRequest {
        peer_addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
        client_version: "1.0".into(),
        login: LoginData::new(),
        keep_alive: Duration::ZERO,
    };
    ClientSession::new(
        ConnectionId::new(7),
        request,
        Arc::new(ConnectionStats::new("test")),
        Arc::new(Accumulator::new(1024)),
    )
}

#[rstest]
fn listening_twice_fails(mut manager: SessionManager) {
    let addr = manager
        .begin_listen_on(SocketAddr::from(([127, 0, 0, 1], 0)))
        .expect("listen");
    assert_ne!(addr.port(), 0);
    assert_eq!(manager.local_addr(), Some(addr));
    assert!(manager.is_listening());
    assert!(matches!(
        manager.begin_listen(0),
        Err(ListenError::AlreadyListening(a)) if a == addr
    ));
    manager.dispose();
    assert_eq!(manager.local_addr(), None);
    assert!(!manager.is_listening());
}

#[rstest]
fn listen_after_dispose_fails(mut manager: SessionManager) {
    manager.dispose();
    manager.dispose();
    assert!(manager.is_disposed());
    assert!(matches!(manager.begin_listen(0), Err(ListenError::Disposed)));
}

#[test]
fn bind_conflict_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = taken.local_addr().expect("addr");
    let mut manager = SessionManager::builder().build().expect("build");
    assert!(matches!(
        manager.begin_listen_on(addr),
        Err(ListenError::Bind { .. })
    ));
}

#[rstest]
fn unicast_to_missing_session_fails(manager: SessionManager) {
    let message = manager.begin_message(MessageRoute::new(1, 1), Recipients::One(ConnectionId::new(9)));
    assert!(matches!(message.end(), Err(SendError::NotConnected)));
}

#[rstest]
#[case(Recipients::All)]
#[case(Recipients::List(vec![ConnectionId::new(1), ConnectionId::new(2)]))]
#[case(Recipients::AllExcept(ConnectionId::new(1)))]
fn broadcast_without_sessions_reaches_nobody(manager: SessionManager, #[case] recipients: Recipients) {
    let mut message = manager.begin_message(MessageRoute::new(1, 1), recipients);
    message.write_u32(5);
    assert_eq!(message.end().expect("broadcast"), 0);
}

#[test]
fn dispose_runs_service_hooks_once() {
    let count = Arc::new(parking_lot::Mutex::new(0));
    let hook = Arc::clone(&count);
    let service = Service::new("Chat", 2)
        .expect("service")
        .on_dispose(move || *hook.lock() += 1);
    let mut manager = SessionManager::builder().service(service).build().expect("build");
    assert!(manager.resolve("Chat", "Say").is_none());
    manager.dispose();
    drop(manager);
    assert_eq!(*count.lock(), 1);
}

#[test]
fn session_tags_are_typed() {
    let session = detached_session();
    session.set_tag(42_u32);
    assert_eq!(session.with_tag(|tag: Option<&u32>| tag.copied()), Some(42));
    assert_eq!(session.with_tag(|tag: Option<&String>| tag.cloned()), None);
    assert_eq!(session.take_tag::<String>(), None);
    assert_eq!(session.take_tag::<u32>(), Some(42));
    assert_eq!(session.take_tag::<u32>(), None);
}

#[test]
fn session_user_identity() {
    let session = detached_session();
    assert_eq!(session.user_id(), None);
    session.set_user(41, "Ada");
    assert_eq!(session.user_id(), Some(41));
    assert_eq!(session.user_name().as_deref(), Some("Ada"));
}

#[test]
fn detached_session_cannot_disconnect() {
    let session = detached_session();
    assert!(!session.disconnect("bye"));
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert_eq!(session.stats().disconnect_reason(), None);
}

#[test]
fn config_normalizes_backoff() {
    let config = ServerConfig::default()
        .backoff(BackoffConfig {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::ZERO,
        })
        .normalized();
    assert_eq!(config.backoff.initial_delay, Duration::from_millis(1));
    assert_eq!(config.backoff.max_delay, Duration::from_secs(2));
}
