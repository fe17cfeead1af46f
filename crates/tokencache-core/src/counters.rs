//! Process-wide operation counters for instrumented stores.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use serde::Serialize;

use crate::metrics;

static GLOBAL_COUNTERS: LazyLock<Arc<CacheCounters>> =
    LazyLock::new(|| Arc::new(CacheCounters::default()));

/// Atomic counters updated by [`InstrumentedStore`](crate::InstrumentedStore).
///
/// Every update is also forwarded to the `metrics` facade, so a snapshot and
/// a Prometheus scrape describe the same operations. Tests that need exact
/// numbers should use a private instance rather than [`CacheCounters::global`].
#[derive(Debug, Default)]
pub struct CacheCounters {
    reads: AtomicU64,
    read_misses: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
    bytes_added: AtomicU64,
    bytes_removed: AtomicU64,
    read_latency_nanos: AtomicU64,
    write_latency_nanos: AtomicU64,
    errors: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters shared by every store that was not given its own instance.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_COUNTERS)
    }

    pub fn record_read(&self, backend: &'static str, latency: Duration, hit: bool) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if !hit {
            self.read_misses.fetch_add(1, Ordering::Relaxed);
        }
        self.read_latency_nanos
            .fetch_add(duration_nanos(latency), Ordering::Relaxed);
        metrics::record_read(backend, latency, hit);
    }

    pub fn record_write(
        &self,
        backend: &'static str,
        latency: Duration,
        added: usize,
        replaced: usize,
    ) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_added.fetch_add(added as u64, Ordering::Relaxed);
        self.bytes_removed
            .fetch_add(replaced as u64, Ordering::Relaxed);
        self.write_latency_nanos
            .fetch_add(duration_nanos(latency), Ordering::Relaxed);
        metrics::record_write(backend, latency, added, replaced);
    }

    pub fn record_remove(&self, backend: &'static str, freed: usize) {
        self.removes.fetch_add(1, Ordering::Relaxed);
        self.bytes_removed.fetch_add(freed as u64, Ordering::Relaxed);
        metrics::record_remove(backend, freed);
    }

    /// Counts a failed operation. Failed reads and writes still contribute
    /// their latency to the histograms but not to the averages below.
    pub fn record_error(
        &self,
        backend: &'static str,
        operation: &'static str,
        kind: &'static str,
        latency: Option<Duration>,
    ) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        match (operation, latency) {
            ("get", Some(latency)) => metrics::record_read_latency(backend, latency),
            ("set", Some(latency)) => metrics::record_write_latency(backend, latency),
            _ => {}
        }
        metrics::record_error(backend, operation, kind);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let reads = self.reads.load(Ordering::Relaxed);
        let writes = self.writes.load(Ordering::Relaxed);
        let bytes_added = self.bytes_added.load(Ordering::Relaxed);
        let bytes_removed = self.bytes_removed.load(Ordering::Relaxed);
        CounterSnapshot {
            reads,
            read_misses: self.read_misses.load(Ordering::Relaxed),
            writes,
            removes: self.removes.load(Ordering::Relaxed),
            bytes_added,
            bytes_removed,
            current_size: bytes_added as i64 - bytes_removed as i64,
            avg_read_latency: average(self.read_latency_nanos.load(Ordering::Relaxed), reads),
            avg_write_latency: average(self.write_latency_nanos.load(Ordering::Relaxed), writes),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheCounters`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub reads: u64,
    pub read_misses: u64,
    pub writes: u64,
    pub removes: u64,
    pub bytes_added: u64,
    pub bytes_removed: u64,
    /// Net bytes believed to be stored. Can go negative when removals race
    /// with writes, or when entries written by an earlier process are removed.
    pub current_size: i64,
    pub avg_read_latency: Duration,
    pub avg_write_latency: Duration,
    pub errors: u64,
}

impl CounterSnapshot {
    /// Read hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            ((self.reads - self.read_misses) as f64 / self.reads as f64) * 100.0
        }
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn average(total_nanos: u64, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(total_nanos / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_size() {
        let counters = CacheCounters::new();
        counters.record_write("test", Duration::from_micros(10), 10, 0);
        counters.record_write("test", Duration::from_micros(30), 4, 10);
        counters.record_remove("test", 4);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.writes, 2);
        assert_eq!(snapshot.removes, 1);
        assert_eq!(snapshot.bytes_added, 14);
        assert_eq!(snapshot.bytes_removed, 14);
        assert_eq!(snapshot.current_size, 0);
        assert_eq!(snapshot.avg_write_latency, Duration::from_micros(20));
    }

    #[test]
    fn test_hit_rate() {
        let counters = CacheCounters::new();
        counters.record_read("test", Duration::ZERO, true);
        counters.record_read("test", Duration::ZERO, true);
        counters.record_read("test", Duration::ZERO, true);
        counters.record_read("test", Duration::ZERO, false);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.read_misses, 1);
        assert!((snapshot.hit_rate() - 75.0).abs() < 0.01);
        assert_eq!(CounterSnapshot::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_global_is_shared() {
        let a = CacheCounters::global();
        let b = CacheCounters::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
