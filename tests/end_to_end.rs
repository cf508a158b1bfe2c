//! End-to-end tests pairing a real client with a real session manager over
//! loopback sockets.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use muxframe::{
    ClientConnection,
    SessionManager,
    client::ConnectionHandle,
    login::{LoginData, UserRole, require_credentials},
    server::{Recipients, SessionContext},
    service::{MessageRoute, Service},
    stats::ConnectionStatus,
};
use muxframe_testing::{Loopback, pump_until};
use parking_lot::Mutex;
use rstest::rstest;

const USERS: u8 = 1;
const VERIFIED: u8 = 1;
const CHAT: u8 = 2;
const SAY: u8 = 1;

fn player() -> LoginData {
    LoginData::new()
        .with_user_role(&UserRole::Player)
        .expect("role")
}

fn verified_listener(seen: Arc<Mutex<Option<(u64, String)>>>) -> Service<ConnectionHandle> {
    Service::new("Users", u32::from(USERS))
        .expect("service")
        .with_handler("Verified", u32::from(VERIFIED), move |_: &ConnectionHandle, reader| {
            let id = reader.read_varint_u64()?;
            let name = reader.read_string()?;
            *seen.lock() = Some((id, name.to_owned()));
            Ok(())
        })
        .expect("handler")
}

#[test]
fn player_login_receives_verified() {
    let seen = Arc::new(Mutex::new(None));
    let users = Service::new("Users", u32::from(USERS))
        .expect("service")
        .with_message("Verified", u32::from(VERIFIED))
        .expect("message");
    let mut lb = Loopback::start(
        SessionManager::builder().service(users),
        ClientConnection::builder().service(verified_listener(Arc::clone(&seen))),
    );
    lb.connect(player());

    let session = lb.manager.clients().pop().expect("session");
    assert_eq!(session.login().user_role(), Some(UserRole::Player));
    assert_eq!(session.client_version(), env!("CARGO_PKG_VERSION"));

    let mut verified = lb
        .manager
        .begin_message(MessageRoute::new(USERS, VERIFIED), Recipients::One(session.id()));
    verified.write_varint_u64(42).write_string("ada");
    assert_eq!(verified.end().expect("send"), 1);

    assert!(lb.pump_until(|_| seen.lock().is_some()), "Verified never arrived");
    assert_eq!(*seen.lock(), Some((42, "ada".to_owned())));
    assert_eq!(
        lb.client_events.statuses(),
        [ConnectionStatus::Connecting, ConnectionStatus::Connected]
    );
}

#[rstest]
#[case::wrong_password(Some("hunter2"), None, "wrong password")]
#[case::wrong_project(None, Some("moon"), "unknown project")]
fn rejected_login_reports_reason(
    #[case] password: Option<&str>,
    #[case] project: Option<&str>,
    #[case] expected: &str,
) {
    let mut lb = Loopback::start(
        SessionManager::builder().approval(require_credentials(
            Some("secret".into()),
            Some("mars".into()),
        )),
        ClientConnection::builder(),
    );
    let mut login = player()
        .with_password(password.unwrap_or("secret"))
        .expect("password");
    login = login.with_project_id(project.unwrap_or("mars")).expect("project");
    let options = lb.options(login);
    lb.client.begin_connect(&options).expect("begin");

    assert!(lb.pump_until(|lb| lb.client_events.saw(ConnectionStatus::Disconnected)));
    let reason = lb.client_events.disconnect_reason().expect("reason");
    assert!(reason.contains(expected), "unexpected reason {reason:?}");
    assert!(!lb.client_events.saw(ConnectionStatus::Connected));
    assert_eq!(lb.manager.client_count(), 0);
    assert!(lb.server_events.records().is_empty());
}

#[test]
fn listen_then_dispose_immediately() {
    let mut manager = SessionManager::builder().build().expect("build");
    manager.begin_listen(0).expect("listen");
    manager.dispose();
    assert_eq!(manager.client_count(), 0);
    assert!(manager.is_disposed());
    assert_eq!(manager.local_addr(), None);
}

#[test]
fn server_disconnect_delivers_reason() {
    let mut lb = Loopback::bare();
    lb.connect(player());
    let id = lb.manager.clients()[0].id();

    assert!(lb.manager.disconnect_client(id, "kicked for idling"));
    assert!(lb.pump_until(|lb| lb.client_events.saw(ConnectionStatus::Disconnected)));
    assert_eq!(
        lb.client_events.disconnect_reason().as_deref(),
        Some("kicked for idling")
    );
    assert!(lb.pump_until(|lb| lb.manager.client_count() == 0));
    assert_eq!(
        lb.server_events.sessions_with(ConnectionStatus::Disconnected),
        [id]
    );
    assert!(!lb.manager.disconnect_client(id, "again"));
}

#[test]
fn client_disconnect_reaches_session() {
    let mut lb = Loopback::bare();
    lb.connect(player());
    let session = lb.manager.clients().pop().expect("session");

    assert!(lb.client.disconnect("logging off"));
    assert!(lb.pump_until(|lb| {
        lb.manager.client_count() == 0 && lb.client_events.saw(ConnectionStatus::Disconnected)
    }));
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert_eq!(
        session.stats().disconnect_reason().as_deref(),
        Some("logging off")
    );
    assert!(!lb.client.disconnect("twice"));
}

#[test]
fn dispose_closes_connected_clients() {
    let mut lb = Loopback::bare();
    lb.connect(player());
    lb.manager.dispose();

    assert!(lb.pump_until(|lb| lb.client_events.saw(ConnectionStatus::Disconnected)));
    assert_eq!(
        lb.client_events.disconnect_reason().as_deref(),
        Some("connection disposed")
    );
}

#[test]
fn chat_is_broadcast_to_every_session() {
    let received = Arc::new(AtomicU64::new(0));
    let relay = Service::new("Chat", u32::from(CHAT))
        .expect("service")
        .with_handler("Say", u32::from(SAY), |ctx: &SessionContext, reader| {
            let text = reader.read_string()?.to_owned();
            let mut echo = ctx
                .manager()
                .begin_message(MessageRoute::new(CHAT, SAY), Recipients::All);
            echo.write_string(&text);
            let _ = echo.end();
            Ok(())
        })
        .expect("handler");
    let count = Arc::clone(&received);
    let listener = move || {
        let count = Arc::clone(&count);
        Service::new("Chat", u32::from(CHAT))
            .expect("service")
            .with_handler("Say", u32::from(SAY), move |_: &ConnectionHandle, reader| {
                assert_eq!(reader.read_string()?, "hello");
                count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .expect("handler")
    };
    let mut lb = Loopback::start(
        SessionManager::builder().service(relay),
        ClientConnection::builder().service(listener()),
    );
    lb.connect(player());
    let mut second = ClientConnection::builder()
        .service(listener())
        .build()
        .expect("second client");
    second.begin_connect(&lb.options(player())).expect("connect");
    assert!(lb.pump_until(|lb| lb.manager.client_count() == 2));

    let mut say = lb.client.begin_message(MessageRoute::new(CHAT, SAY));
    say.write_string("hello");
    say.end().expect("say");
    let Loopback { manager, client, .. } = &mut lb;
    let reached = pump_until(Duration::from_secs(5), || {
        manager.update();
        client.update();
        second.update();
        received.load(Ordering::Relaxed) == 2
    });
    assert!(reached, "broadcast reached {} clients", received.load(Ordering::Relaxed));
}

#[test]
fn profiler_counts_each_route() {
    let relay = Service::new("Chat", u32::from(CHAT))
        .expect("service")
        .with_handler("Say", u32::from(SAY), |_: &SessionContext, reader| {
            reader.read_string()?;
            Ok(())
        })
        .expect("handler");
    let chat = Service::new("Chat", u32::from(CHAT))
        .expect("service")
        .with_message("Say", u32::from(SAY))
        .expect("message");
    let mut lb = Loopback::start(
        SessionManager::builder().service(relay),
        ClientConnection::builder().service(chat),
    );
    lb.connect(player());
    lb.client.profiler_start();
    lb.manager.profiler_start();

    for _ in 0..3 {
        let mut say = lb.client.begin_named("Chat", "Say").expect("route");
        say.write_string("hey");
        say.tag("greeting").end().expect("say");
    }
    let stats = Arc::clone(lb.manager.clients()[0].stats());
    assert!(lb.pump_until(|_| stats.traffic().messages_received >= 1));
    lb.pump_for(Duration::from_millis(100));

    let sent = lb.client.profiler_stop().expect("client report");
    let counters = sent.get("Chat", "Say").expect("Say row");
    assert_eq!(counters.sent_messages, 3);
    assert_eq!(counters.tags["greeting"].messages, 3);
    assert_eq!(counters.sent_bytes, counters.tags["greeting"].bytes);

    let received = lb.manager.profiler_stop().expect("server report");
    let counters = received.get("Chat", "Say").expect("Say row");
    assert_eq!(counters.received_messages, 3);
    assert_eq!(counters.received_bytes, sent.totals().sent_bytes);
}
