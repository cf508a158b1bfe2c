//! Shared connection state written by the I/O thread and read by the tick.
//!
//! Everything here is updated with atomics (or a short critical section for
//! the disconnect reason), so the application may poll counters from its
//! tick without coordinating with the transport.

use std::{
    fmt,
    sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering},
    time::Instant,
};

use parking_lot::Mutex;
use serde::Serialize;

/// Lifecycle state of a connection or session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionStatus {
    /// No transport is open.
    Disconnected,
    /// A handshake is in progress.
    Connecting,
    /// The handshake completed and traffic may flow.
    Connected,
}

impl ConnectionStatus {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Additive byte-sum checksum paired with a message counter.
///
/// The sum wraps at `u32::MAX`. It detects dropped, duplicated and altered
/// bytes but not reordering; peers compare `(counter, checksum)` pairs
/// periodically to detect desynchronisation.
#[derive(Debug, Default)]
pub struct RollingChecksum {
    counter: AtomicU64,
    sum: AtomicU32,
}

/// Point-in-time copy of a [`RollingChecksum`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChecksumState {
    /// Messages folded into the checksum.
    pub counter: u64,
    /// Wrapping byte sum over those messages.
    pub checksum: u32,
}

/// Wrapping byte sum of `bytes`.
///
/// # Examples
///
/// ```
/// use muxframe::stats::byte_sum;
///
/// assert_eq!(byte_sum(&[1, 2, 3]), 6);
/// assert_eq!(byte_sum(&[]), 0);
/// ```
#[must_use]
pub fn byte_sum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0_u32, |acc, b| acc.wrapping_add(u32::from(*b)))
}

impl RollingChecksum {
    /// Fold one message into the running state, returning the new counter.
    ///
    /// Only the thread owning the transport calls this, so the two atomics
    /// never race with each other.
    pub fn record(&self, bytes: &[u8]) -> u64 {
        let sum = byte_sum(bytes);
        // `fetch_add` on AtomicU32 wraps on overflow.
        self.sum.fetch_add(sum, Ordering::Relaxed);
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Restart from zero for a new transport.
    pub fn reset(&self) {
        self.counter.store(0, Ordering::Release);
        self.sum.store(0, Ordering::Relaxed);
    }

    /// Read the current state.
    #[must_use]
    pub fn snapshot(&self) -> ChecksumState {
        ChecksumState {
            counter: self.counter.load(Ordering::Acquire),
            checksum: self.sum.load(Ordering::Relaxed),
        }
    }
}

/// Monotonic wire-level traffic counters.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of [`TrafficCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrafficSnapshot {
    /// Binary transport messages sent.
    pub messages_sent: u64,
    /// Bytes carried by those messages.
    pub bytes_sent: u64,
    /// Binary transport messages received.
    pub messages_received: u64,
    /// Bytes carried by those messages.
    pub bytes_received: u64,
}

impl TrafficCounters {
    /// Count one sent message of `len` bytes.
    pub fn add_sent(&self, len: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Count one received message of `len` bytes.
    pub fn add_received(&self, len: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Sticky disconnect reason: the first non-empty reason wins.
#[derive(Debug, Default)]
pub struct DisconnectReason(Mutex<Option<String>>);

impl DisconnectReason {
    /// Record `reason` unless one is already set or `reason` is empty.
    ///
    /// Returns `true` if this call set the reason.
    pub fn set(&self, reason: &str) -> bool {
        if reason.is_empty() {
            return false;
        }
        let mut slot = self.0.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason.to_owned());
        true
    }

    /// The recorded reason, if any.
    #[must_use]
    pub fn get(&self) -> Option<String> { self.0.lock().clone() }

    /// Forget the reason ahead of a new connection attempt.
    pub fn clear(&self) { *self.0.lock() = None; }
}

/// Point-in-time copy of a [`ConnectionStats`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Diagnostic label.
    pub label: String,
    /// Lifecycle state.
    pub status: ConnectionStatus,
    /// Wire-level counters.
    pub traffic: TrafficSnapshot,
    /// Checksum over sent binary messages.
    pub sent: ChecksumState,
    /// Checksum over received binary messages.
    pub received: ChecksumState,
    /// Sticky disconnect reason.
    pub disconnect_reason: Option<String>,
}

/// Live state of one connection or session.
///
/// Shared between the tick thread and the I/O thread behind an `Arc`, and
/// optionally enumerated through a [`NetworkRegistry`](crate::registry::NetworkRegistry).
#[derive(Debug)]
pub struct ConnectionStats {
    label: String,
    status: AtomicU8,
    traffic: TrafficCounters,
    sent: RollingChecksum,
    received: RollingChecksum,
    reason: DisconnectReason,
    last_received: Mutex<Option<Instant>>,
}

impl ConnectionStats {
    /// Create stats for a connection identified by `label` in diagnostics.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: AtomicU8::new(ConnectionStatus::Disconnected.as_u8()),
            traffic: TrafficCounters::default(),
            sent: RollingChecksum::default(),
            received: RollingChecksum::default(),
            reason: DisconnectReason::default(),
            last_received: Mutex::new(None),
        }
    }

    /// Diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str { &self.label }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Wire-level counters.
    #[must_use]
    pub fn traffic(&self) -> TrafficSnapshot { self.traffic.snapshot() }

    /// Checksum over sent binary messages.
    #[must_use]
    pub fn sent_checksum(&self) -> ChecksumState { self.sent.snapshot() }

    /// Checksum over received binary messages.
    #[must_use]
    pub fn received_checksum(&self) -> ChecksumState { self.received.snapshot() }

    /// Sticky disconnect reason.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<String> { self.reason.get() }

    pub(crate) fn reason(&self) -> &DisconnectReason { &self.reason }

    /// When the last transport message of any kind arrived.
    #[must_use]
    pub fn last_received(&self) -> Option<Instant> { *self.last_received.lock() }

    pub(crate) fn touch_received(&self) { *self.last_received.lock() = Some(Instant::now()); }

    /// Account for a sent binary message, returning the new sent counter.
    pub(crate) fn record_sent(&self, bytes: &[u8]) -> u64 {
        self.traffic.add_sent(bytes.len());
        self.sent.record(bytes)
    }

    /// Account for a received binary message.
    pub(crate) fn record_received(&self, bytes: &[u8]) {
        self.traffic.add_received(bytes.len());
        self.received.record(bytes);
    }

    /// Copy every field at once.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            label: self.label.clone(),
            status: self.status(),
            traffic: self.traffic(),
            sent: self.sent_checksum(),
            received: self.received_checksum(),
            disconnect_reason: self.disconnect_reason(),
        }
    }

    /// Prepare for a fresh connection attempt.
    ///
    /// Checksums are per transport and restart with it; traffic counters stay
    /// monotonic across attempts.
    pub(crate) fn reset(&self) {
        self.reason.clear();
        self.sent.reset();
        self.received.reset();
        *self.last_received.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn first_reason_wins() {
        let reason = DisconnectReason::default();
        assert!(!reason.set(""));
        assert!(reason.set("local error"));
        assert!(!reason.set("closed by peer"));
        assert_eq!(reason.get().as_deref(), Some("local error"));
    }

    #[test]
    fn concurrent_reasons_record_exactly_one() {
        let reason = Arc::new(DisconnectReason::default());
        let winners: usize = (0..8)
            .map(|i| {
                let reason = Arc::clone(&reason);
                thread::spawn(move || reason.set(&format!("writer {i}")))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().expect("writer thread")))
            .sum();
        assert_eq!(winners, 1);
        assert!(reason.get().is_some());
    }

    #[test]
    fn checksum_wraps_instead_of_overflowing() {
        let checksum = RollingChecksum::default();
        let big = vec![0xff_u8; 10_000_000];
        checksum.record(&big);
        checksum.record(&big);
        let state = checksum.snapshot();
        assert_eq!(state.counter, 2);
        assert_eq!(state.checksum, 805_032_704);
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let original = b"position update".to_vec();
        let mut corrupted = original.clone();
        corrupted[3] ^= 0x10;
        assert_ne!(byte_sum(&original), byte_sum(&corrupted));
    }

    #[test]
    fn status_round_trips_through_atomic() {
        let stats = ConnectionStats::new("test");
        assert_eq!(stats.status(), ConnectionStatus::Disconnected);
        stats.set_status(ConnectionStatus::Connected);
        assert_eq!(stats.status(), ConnectionStatus::Connected);
    }
}
