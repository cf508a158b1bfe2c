#![cfg(feature = "metrics")]
//! Tests for the `muxframe` metric helpers.
//!
//! Helpers are called on the test thread under a local
//! `metrics_util::debugging::DebuggingRecorder`.

use muxframe::metrics::{
    ActiveConnection,
    BYTES_TOTAL,
    CONNECTIONS_ACTIVE,
    Direction,
    HANDSHAKE_REJECTIONS_TOTAL,
    MESSAGES_TOTAL,
    PROTOCOL_ERRORS_TOTAL,
    Side,
    inc_handshake_rejections,
    inc_protocol_errors,
    record_message,
};
use muxframe_testing::with_recorder;
use rstest::rstest;

#[rstest]
#[case(Direction::Inbound, "inbound")]
#[case(Direction::Outbound, "outbound")]
fn message_metrics_count_messages_and_bytes(#[case] direction: Direction, #[case] label: &str) {
    let ((), readings) = with_recorder(|| {
        record_message(direction, 10);
        record_message(direction, 32);
    });
    let labels = [("direction", label)];
    assert_eq!(readings.counter(MESSAGES_TOTAL, &labels), 2);
    assert_eq!(readings.counter(BYTES_TOTAL, &labels), 42);
}

#[rstest]
#[case(Side::Client, 1)]
#[case(Side::Server, 3)]
fn protocol_errors_are_labelled_by_side(#[case] side: Side, #[case] expected: u64) {
    let ((), readings) = with_recorder(|| {
        (0..expected).for_each(|_| inc_protocol_errors(side));
    });
    assert_eq!(
        readings.counter(PROTOCOL_ERRORS_TOTAL, &[("side", side.as_str())]),
        expected
    );
}

#[test]
fn handshake_rejections_increment() {
    let ((), readings) = with_recorder(|| {
        inc_handshake_rejections();
        inc_handshake_rejections();
    });
    assert_eq!(readings.counter(HANDSHAKE_REJECTIONS_TOTAL, &[]), 2);
}

#[test]
fn active_connection_gauge_follows_guard() {
    let (still_open, readings) = with_recorder(|| {
        let first = ActiveConnection::new(Side::Server);
        let second = ActiveConnection::new(Side::Server);
        drop(first);
        second
    });
    assert_eq!(
        readings.gauge(CONNECTIONS_ACTIVE, &[("side", "server")]),
        Some(1.0)
    );
    assert_eq!(readings.gauge(CONNECTIONS_ACTIVE, &[("side", "client")]), None);
    drop(still_open);
}
