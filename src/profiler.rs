//! Opt-in per-message-type traffic accounting.
//!
//! A [`Profiler`] is idle until [`start`](Profiler::start) is called. While
//! running it tallies, for every `(service, message)` route, the sub-messages
//! and bytes sent and received, plus sent sub-counters for each custom tag
//! attached with [`OutgoingMessage::tag`](crate::batch::OutgoingMessage::tag).
//! [`stop`](Profiler::stop) freezes the tallies into a [`ProfileSnapshot`],
//! which the owning connection turns into a named [`ProfileReport`].

use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;

use crate::service::MessageRoute;

/// Counts for one custom tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TagCounters {
    /// Sub-messages sent with the tag.
    pub messages: u64,
    /// Sub-message bytes sent with the tag, framing included.
    pub bytes: u64,
}

/// Counts for one message type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MessageCounters {
    /// Sub-messages sent.
    pub sent_messages: u64,
    /// Sub-message bytes sent, framing included.
    pub sent_bytes: u64,
    /// Sub-messages received.
    pub received_messages: u64,
    /// Sub-message bytes received, framing included.
    pub received_bytes: u64,
    /// Sent sub-counters by custom tag.
    pub tags: BTreeMap<String, TagCounters>,
}

#[derive(Debug)]
struct Running {
    started: Instant,
    routes: BTreeMap<MessageRoute, MessageCounters>,
}

/// Frozen tallies keyed by route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// Time between start and stop.
    pub duration: Duration,
    /// Tallies per route.
    pub routes: BTreeMap<MessageRoute, MessageCounters>,
}

/// Shared accounting state for one connection or session manager.
#[derive(Debug, Default)]
pub struct Profiler {
    state: Mutex<Option<Running>>,
}

impl Profiler {
    /// Start a fresh profile, discarding any profile in progress.
    pub fn start(&self) {
        *self.state.lock() = Some(Running {
            started: Instant::now(),
            routes: BTreeMap::new(),
        });
    }

    /// Returns `true` while a profile is being recorded.
    #[must_use]
    pub fn is_running(&self) -> bool { self.state.lock().is_some() }

    /// Stop profiling and return what was recorded.
    ///
    /// Returns `None` when no profile was running.
    pub fn stop(&self) -> Option<ProfileSnapshot> {
        let running = self.state.lock().take()?;
        Some(ProfileSnapshot {
            duration: running.started.elapsed(),
            routes: running.routes,
        })
    }

    /// Account for `copies` deliveries of one sub-message of `bytes` bytes.
    pub(crate) fn record_sent(&self, route: MessageRoute, tag: Option<&str>, copies: u64, bytes: u64) {
        let mut state = self.state.lock();
        let Some(running) = state.as_mut() else {
            return;
        };
        let counters = running.routes.entry(route).or_default();
        counters.sent_messages += copies;
        counters.sent_bytes += bytes * copies;
        if let Some(tag) = tag {
            let tagged = counters.tags.entry(tag.to_owned()).or_default();
            tagged.messages += copies;
            tagged.bytes += bytes * copies;
        }
    }

    /// Account for one received sub-message of `bytes` bytes.
    pub(crate) fn record_received(&self, route: MessageRoute, bytes: u64) {
        let mut state = self.state.lock();
        if let Some(running) = state.as_mut() {
            let counters = running.routes.entry(route).or_default();
            counters.received_messages += 1;
            counters.received_bytes += bytes;
        }
    }
}

/// One row of a [`ProfileReport`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageProfile {
    /// Service id.
    pub service_id: u8,
    /// Service name, or `?` when unregistered.
    pub service: String,
    /// Message id.
    pub message_id: u8,
    /// Message type name, or `?` when unregistered.
    pub message: String,
    /// Recorded counts.
    #[serde(flatten)]
    pub counters: MessageCounters,
}

/// Named profiling results, ordered by service id then message id.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProfileReport {
    /// Seconds between start and stop.
    pub duration_secs: f64,
    /// One row per route that saw traffic.
    pub messages: Vec<MessageProfile>,
}

impl ProfileReport {
    /// Attach names to `snapshot` using `names`.
    pub fn build<'a>(
        snapshot: ProfileSnapshot,
        names: impl Fn(MessageRoute) -> Option<(&'a str, &'a str)>,
    ) -> Self {
        let messages = snapshot
            .routes
            .into_iter()
            .map(|(route, counters)| {
                let (service, message) = names(route).unwrap_or(("?", "?"));
                MessageProfile {
                    service_id: route.service,
                    service: service.to_owned(),
                    message_id: route.message,
                    message: message.to_owned(),
                    counters,
                }
            })
            .collect();
        Self {
            duration_secs: snapshot.duration.as_secs_f64(),
            messages,
        }
    }

    /// Row for `service`/`message`, by name.
    #[must_use]
    pub fn get(&self, service: &str, message: &str) -> Option<&MessageCounters> {
        self.messages
            .iter()
            .find(|m| m.service == service && m.message == message)
            .map(|m| &m.counters)
    }

    /// Sum of all rows.
    #[must_use]
    pub fn totals(&self) -> MessageCounters {
        self.messages.iter().fold(MessageCounters::default(), |mut acc, m| {
            acc.sent_messages += m.counters.sent_messages;
            acc.sent_bytes += m.counters.sent_bytes;
            acc.received_messages += m.counters.received_messages;
            acc.received_bytes += m.counters.received_bytes;
            acc
        })
    }
}

impl fmt::Display for ProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "profile over {:.3}s", self.duration_secs)?;
        writeln!(
            f,
            "{:<32} {:>10} {:>12} {:>10} {:>12}",
            "service.message", "sent", "sent bytes", "recv", "recv bytes"
        )?;
        for row in &self.messages {
            let name = format!("{}.{} ({}/{})", row.service, row.message, row.service_id, row.message_id);
            let c = &row.counters;
            writeln!(
                f,
                "{name:<32} {:>10} {:>12} {:>10} {:>12}",
                c.sent_messages, c.sent_bytes, c.received_messages, c.received_bytes
            )?;
            for (tag, t) in &c.tags {
                writeln!(f, "  #{tag:<29} {:>10} {:>12}", t.messages, t.bytes)?;
            }
        }
        let total = self.totals();
        write!(
            f,
            "{:<32} {:>10} {:>12} {:>10} {:>12}",
            "total", total.sent_messages, total.sent_bytes, total.received_messages, total.received_bytes
        )
    }
}
