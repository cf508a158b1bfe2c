//! Test helpers shared by `muxframe`'s integration tests.
//!
//! The helpers drive real endpoints over loopback sockets: a
//! [`Loopback`] pairs a session manager with a client and ticks both, the
//! recorders capture lifecycle callbacks, and [`RawPeer`] speaks the wire
//! protocol by hand so tests can misbehave on purpose.

pub mod logging;
pub mod loopback;
pub mod metrics;
pub mod raw_peer;
pub mod recorder;

pub use logging::{LoggerHandle, logger};
pub use loopback::{Loopback, pump_until};
pub use metrics::{MetricReadings, with_recorder};
pub use raw_peer::RawPeer;
pub use recorder::{ClientRecord, ClientRecorder, ServerRecord, ServerRecorder};
