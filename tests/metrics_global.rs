#![cfg(feature = "metrics")]
//! Metrics emitted from the I/O threads of live endpoints.
//!
//! Installs a process-wide recorder, so this binary holds a single test.

use std::time::Duration;

use muxframe::{
    ClientConnection,
    SessionManager,
    login::{LoginData, UserRole},
    metrics::{CONNECTIONS_ACTIVE, HANDSHAKE_REJECTIONS_TOTAL, MESSAGES_TOTAL},
    service::MessageRoute,
    stats::ConnectionStatus,
};
use metrics_util::debugging::DebuggingRecorder;
use muxframe_testing::{Loopback, MetricReadings, pump_until};

#[test]
fn live_traffic_is_measured() {
    let recorder = DebuggingRecorder::new();
    let mut readings = MetricReadings::new(recorder.snapshotter());
    metrics::set_global_recorder(recorder).expect("install recorder");

    let login = LoginData::new()
        .with_user_role(&UserRole::Player)
        .expect("role");
    let mut lb = Loopback::start(
        SessionManager::builder().approve_with(|request| {
            match request.login.username() {
                Some("mallory") => Err("banned".to_owned()),
                _ => Ok(()),
            }
        }),
        ClientConnection::builder(),
    );
    lb.connect(login.clone());
    assert_eq!(
        readings
            .refresh()
            .gauge(CONNECTIONS_ACTIVE, &[("side", "server")]),
        Some(1.0)
    );

    for _ in 0..5 {
        let mut message = lb.client.begin_message(MessageRoute::new(1, 1));
        message.write_u8(7);
        message.end().expect("send");
        lb.client.flush();
    }
    let session = lb.manager.clients().pop().expect("session");
    assert!(lb.pump_until(|_| session.stats().traffic().messages_received == 5));
    readings.refresh();
    assert!(readings.counter(MESSAGES_TOTAL, &[("direction", "outbound")]) >= 5);
    assert!(readings.counter(MESSAGES_TOTAL, &[("direction", "inbound")]) >= 5);

    lb.client.disconnect("switching user");
    assert!(lb.pump_until(|lb| lb.client_events.saw(ConnectionStatus::Disconnected)));
    let banned = login.with_username("mallory").expect("username");
    let options = lb.options(banned);
    lb.client.begin_connect(&options).expect("reconnect");
    assert!(lb.pump_until(|lb| lb.client_events.disconnect_reason().as_deref() == Some("banned")));
    assert!(lb.pump_until(|lb| lb.manager.client_count() == 0));
    let settled = pump_until(Duration::from_secs(5), || {
        let readings = readings.refresh();
        readings.counter(HANDSHAKE_REJECTIONS_TOTAL, &[]) == 1
            && readings.gauge(CONNECTIONS_ACTIVE, &[("side", "server")]) == Some(0.0)
            && readings.gauge(CONNECTIONS_ACTIVE, &[("side", "client")]) == Some(0.0)
    });
    assert!(
        settled,
        "rejections {}, active server {:?}, active client {:?}",
        readings.counter(HANDSHAKE_REJECTIONS_TOTAL, &[]),
        readings.gauge(CONNECTIONS_ACTIVE, &[("side", "server")]),
        readings.gauge(CONNECTIONS_ACTIVE, &[("side", "client")]),
    );
}
