//! Atomic relay counters.
//!
//! Lock-free counters describing streaming relay activity, reported by the
//! health endpoint. All atomics use `Relaxed` ordering: these are display
//! counters with no synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Default)]
struct StatsInner {
    started: AtomicU64,
    completed: AtomicU64,
    client_cancelled: AtomicU64,
    failed: AtomicU64,
    bytes_relayed: AtomicU64,
}

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    Completed,
    ClientCancelled,
    Failed,
}

/// Thread-safe relay statistics. Cheap to clone (Arc).
#[derive(Clone, Default)]
pub struct RelayStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub streams_started: u64,
    pub streams_completed: u64,
    pub streams_client_cancelled: u64,
    pub streams_failed: u64,
    pub streams_active: u64,
    pub bytes_relayed: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_started(&self) {
        self.inner.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_ended(&self, end: RelayEnd, bytes: u64) {
        let counter = match end {
            RelayEnd::Completed => &self.inner.completed,
            RelayEnd::ClientCancelled => &self.inner.client_cancelled,
            RelayEnd::Failed => &self.inner.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_relayed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let started = self.inner.started.load(Ordering::Relaxed);
        let completed = self.inner.completed.load(Ordering::Relaxed);
        let client_cancelled = self.inner.client_cancelled.load(Ordering::Relaxed);
        let failed = self.inner.failed.load(Ordering::Relaxed);
        StatsSnapshot {
            streams_started: started,
            streams_completed: completed,
            streams_client_cancelled: client_cancelled,
            streams_failed: failed,
            streams_active: started.saturating_sub(completed + client_cancelled + failed),
            bytes_relayed: self.inner.bytes_relayed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_streams_derived_from_counters() {
        let stats = RelayStats::new();
        stats.stream_started();
        stats.stream_started();
        stats.stream_started();
        stats.stream_ended(RelayEnd::Completed, 120);
        stats.stream_ended(RelayEnd::ClientCancelled, 8);

        let snap = stats.snapshot();
        assert_eq!(snap.streams_started, 3);
        assert_eq!(snap.streams_active, 1);
        assert_eq!(snap.bytes_relayed, 128);
    }
}
