//! Registry of live connection statistics.
//!
//! `NetworkRegistry` stores non-owning weak references to the
//! [`ConnectionStats`] of every connection or session registered with it,
//! so diagnostics can enumerate live links without keeping them alive. Dead
//! entries are pruned opportunistically or lazily at lookup time.
//!
//! There is no process-wide instance: create one and hand it to the
//! builders whose connections it should track.

use std::sync::{
    Arc,
    Weak,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::Serialize;

use crate::stats::{ConnectionStats, StatsSnapshot};

/// Identifier assigned to a connection or client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Concurrent registry of connection statistics keyed by [`ConnectionId`].
#[derive(Debug)]
pub struct NetworkRegistry {
    next_id: AtomicU64,
    entries: DashMap<ConnectionId, Weak<ConnectionStats>>,
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }
}

impl NetworkRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Track `stats` under a freshly allocated id.
    pub fn register(&self, stats: &Arc<ConnectionStats>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(id, Arc::downgrade(stats));
        id
    }

    /// Retrieve the stats for `id` if the connection is still alive.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionStats>> {
        let guard = self.entries.get(id);
        let stats = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if stats.is_none() {
            self.entries.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        stats
    }

    /// Stop tracking `id`, typically on teardown.
    pub fn remove(&self, id: &ConnectionId) { self.entries.remove(id); }

    /// Remove all stale weak references.
    ///
    /// `DashMap::retain` acquires per-bucket write locks, so other operations
    /// may contend briefly while the registry is pruned.
    pub fn prune(&self) { self.entries.retain(|_, weak| weak.strong_count() > 0); }

    /// Number of live entries, pruning dead ones first.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.prune();
        self.entries.len()
    }

    /// Prune stale references, then snapshot every live connection.
    ///
    /// The result is sorted by id.
    #[must_use]
    pub fn snapshots(&self) -> Vec<(ConnectionId, StatsSnapshot)> {
        let mut live = Vec::with_capacity(self.entries.len());
        self.entries.retain(|id, weak| {
            if let Some(stats) = weak.upgrade() {
                live.push((*id, stats.snapshot()));
                true
            } else {
                false
            }
        });
        live.sort_by_key(|(id, _)| *id);
        live
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn registry() -> NetworkRegistry { NetworkRegistry::new() }

    #[rstest]
    fn live_entries_are_listed(registry: NetworkRegistry) {
        let first = Arc::new(ConnectionStats::new("first"));
        let second = Arc::new(ConnectionStats::new("second"));
        let a = registry.register(&first);
        let b = registry.register(&second);
        assert_ne!(a, b);

        let labels: Vec<_> = registry
            .snapshots()
            .into_iter()
            .map(|(_, s)| s.label)
            .collect();
        assert_eq!(labels, vec!["first", "second"]);
    }

    #[rstest]
    fn dropped_stats_are_pruned(registry: NetworkRegistry) {
        let stats = Arc::new(ConnectionStats::new("gone"));
        let id = registry.register(&stats);
        drop(stats);

        assert!(registry.get(&id).is_none());
        assert_eq!(registry.active_count(), 0);
        assert!(registry.snapshots().is_empty());
    }

    #[rstest]
    fn removed_entries_are_forgotten(registry: NetworkRegistry) {
        let stats = Arc::new(ConnectionStats::new("removed"));
        let id = registry.register(&stats);
        registry.remove(&id);
        assert!(registry.get(&id).is_none());
    }
}
