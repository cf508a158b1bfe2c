//! Unit tests for client connections that need no server.

use std::{
    net::TcpListener,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rstest::{fixture, rstest};

use super::*;
use crate::{
    batch::SendError,
    registry::NetworkRegistry,
    service::{MessageRoute, Service},
    stats::ConnectionStatus,
};

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<ConnectionStatus>>>);

impl ConnectionEvents for Recorder {
    fn on_status_changed(&mut self, _connection: &ConnectionHandle, status: ConnectionStatus) {
        self.0.lock().push(status);
    }
}

fn pump_until(connection: &mut ClientConnection, mut done: impl FnMut(&ClientConnection) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(connection) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        connection.update();
        thread::sleep(Duration::from_millis(5));
    }
}

/// A port that refuses connections.
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    listener.local_addr().expect("probe addr").port()
}

#[fixture]
fn recorder() -> Recorder { Recorder::default() }

#[rstest]
#[case(ClientConfig::default().max_send_size(1), 64)]
#[case(ClientConfig::default().max_send_size(4096), 4096)]
fn normalized_clamps_send_size(#[case] config: ClientConfig, #[case] expected: usize) {
    assert_eq!(config.normalized().max_send_size, expected);
}

#[test]
fn normalized_receive_size_holds_a_full_send() {
    let config = ClientConfig::default()
        .max_send_size(8192)
        .max_receive_size(16)
        .normalized();
    assert!(config.max_receive_size >= 8192 + 2);
}

#[test]
fn end_fails_while_disconnected() {
    let connection = ClientConnection::builder().build().expect("build");
    let mut message = connection.begin_message(MessageRoute::new(1, 1));
    message.write_u8(1);
    assert!(matches!(message.end(), Err(SendError::NotConnected)));
}

#[test]
fn begin_named_rejects_unknown_names() {
    let connection = ClientConnection::builder().build().expect("build");
    assert!(matches!(
        connection.begin_named("Chat", "Say"),
        Err(SendError::InvalidRoute(_))
    ));
}

#[test]
fn duplicate_services_fail_build() {
    let first = Service::new("Chat", 2).expect("service");
    let second = Service::new("Chat", 3).expect("service");
    let result = ClientConnection::builder().service(first).service(second).build();
    assert!(result.is_err());
}

#[rstest]
fn refused_connect_reports_disconnected(recorder: Recorder) {
    let mut connection = ClientConnection::builder()
        .events(recorder.clone())
        .build()
        .expect("build");
    connection
        .begin_connect(&ConnectOptions::new("127.0.0.1", closed_port()))
        .expect("begin connect");

    pump_until(&mut connection, |c| {
        c.status() == ConnectionStatus::Disconnected
    });
    connection.update();

    assert_eq!(
        *recorder.0.lock(),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Disconnected]
    );
    let reason = connection.disconnect_reason().expect("reason");
    assert!(reason.starts_with("connect failed"), "unexpected reason {reason}");
}

#[test]
fn second_connect_while_pending_is_busy() {
    // Accepts TCP but never answers the WebSocket handshake.
    let silent = TcpListener::bind("127.0.0.1:0").expect("bind silent listener");
    let port = silent.local_addr().expect("addr").port();
    let mut connection = ClientConnection::builder().build().expect("build");
    let options = ConnectOptions::new("127.0.0.1", port);

    connection.begin_connect(&options).expect("first connect");
    assert!(matches!(
        connection.begin_connect(&options),
        Err(ConnectError::Busy(ConnectionStatus::Connecting))
    ));

    connection.dispose();
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
    assert_eq!(
        connection.disconnect_reason().as_deref(),
        Some("connection disposed")
    );
}

#[test]
fn connect_timeout_sets_reason() {
    let silent = TcpListener::bind("127.0.0.1:0").expect("bind silent listener");
    let port = silent.local_addr().expect("addr").port();
    let mut connection = ClientConnection::builder()
        .config(ClientConfig::default().connect_timeout(Duration::from_millis(50)))
        .build()
        .expect("build");

    connection
        .begin_connect(&ConnectOptions::new("127.0.0.1", port))
        .expect("begin connect");
    pump_until(&mut connection, |c| {
        c.status() == ConnectionStatus::Disconnected
    });
    assert_eq!(
        connection.disconnect_reason().as_deref(),
        Some("connect timed out")
    );
}

#[test]
fn dispose_is_idempotent_and_final() {
    let disposed = Arc::new(Mutex::new(0));
    let hook_count = Arc::clone(&disposed);
    let service = Service::new("Chat", 2)
        .expect("service")
        .on_dispose(move || *hook_count.lock() += 1);
    let mut connection = ClientConnection::builder().service(service).build().expect("build");

    connection.dispose();
    connection.dispose();

    assert_eq!(*disposed.lock(), 1);
    assert!(connection.is_disposed());
    assert!(matches!(
        connection.begin_connect(&ConnectOptions::new("127.0.0.1", 1)),
        Err(ConnectError::Disposed)
    ));
}

#[test]
fn network_registry_tracks_lifetime() {
    let registry = Arc::new(NetworkRegistry::new());
    let mut connection = ClientConnection::builder()
        .label("probe")
        .network_registry(Arc::clone(&registry))
        .build()
        .expect("build");
    assert_eq!(registry.active_count(), 1);
    assert_eq!(registry.snapshots()[0].1.label, "probe");

    connection.dispose();
    assert_eq!(registry.active_count(), 0);
}

#[test]
fn profiler_stop_without_start_is_none() {
    let connection = ClientConnection::builder().build().expect("build");
    assert!(connection.profiler_stop().is_none());
    connection.profiler_start();
    let report = connection.profiler_stop().expect("report");
    assert!(report.messages.is_empty());
}

#[test]
#[tracing_test::traced_test]
fn profiler_report_is_logged() {
    let connection = ClientConnection::builder().label("profiled").build().expect("build");
    connection.profiler_start();
    let _ = connection.profiler_stop();
    logs_assert(|lines: &[&str]| {
        lines
            .iter()
            .find(|line| line.contains("profile report"))
            .ok_or_else(|| "no profile report logged".to_owned())
            .and_then(|line| {
                (line.contains("connection=profiled") && line.contains("routes=0"))
                    .then_some(())
                    .ok_or_else(|| format!("report line lacks fields: {line}"))
            })
    });
}
