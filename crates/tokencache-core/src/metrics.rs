//! Metrics emitted through the `metrics` facade.
//!
//! Nothing here installs a recorder; without one every call is a no-op.
//! The harness installs a Prometheus recorder at startup.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const READS_TOTAL: &str = "tokencache_reads_total";
    pub const READ_MISSES_TOTAL: &str = "tokencache_read_misses_total";
    pub const WRITES_TOTAL: &str = "tokencache_writes_total";
    pub const REMOVES_TOTAL: &str = "tokencache_removes_total";
    pub const BYTES_ADDED_TOTAL: &str = "tokencache_bytes_added_total";
    pub const BYTES_REMOVED_TOTAL: &str = "tokencache_bytes_removed_total";
    pub const SIZE_BYTES: &str = "tokencache_size_bytes";
    pub const READ_DURATION_SECONDS: &str = "tokencache_read_duration_seconds";
    pub const WRITE_DURATION_SECONDS: &str = "tokencache_write_duration_seconds";
    pub const ERRORS_TOTAL: &str = "tokencache_errors_total";
}

/// Record a completed read.
pub fn record_read(backend: &'static str, duration: Duration, hit: bool) {
    counter!(names::READS_TOTAL, "backend" => backend).increment(1);
    if !hit {
        counter!(names::READ_MISSES_TOTAL, "backend" => backend).increment(1);
    }
    histogram!(names::READ_DURATION_SECONDS, "backend" => backend).record(duration.as_secs_f64());
}

/// Record the latency of a read that failed.
pub fn record_read_latency(backend: &'static str, duration: Duration) {
    histogram!(names::READ_DURATION_SECONDS, "backend" => backend).record(duration.as_secs_f64());
}

/// Record a completed write of `added` bytes that replaced `replaced` bytes.
pub fn record_write(backend: &'static str, duration: Duration, added: usize, replaced: usize) {
    counter!(names::WRITES_TOTAL, "backend" => backend).increment(1);
    record_size_change(backend, added, replaced);
    histogram!(names::WRITE_DURATION_SECONDS, "backend" => backend).record(duration.as_secs_f64());
}

/// Record the latency of a write that failed.
pub fn record_write_latency(backend: &'static str, duration: Duration) {
    histogram!(names::WRITE_DURATION_SECONDS, "backend" => backend).record(duration.as_secs_f64());
}

/// Record a completed removal that freed `freed` bytes.
pub fn record_remove(backend: &'static str, freed: usize) {
    counter!(names::REMOVES_TOTAL, "backend" => backend).increment(1);
    record_size_change(backend, 0, freed);
}

/// Record a failed store operation.
pub fn record_error(backend: &'static str, operation: &'static str, kind: &'static str) {
    counter!(
        names::ERRORS_TOTAL,
        "backend" => backend,
        "operation" => operation,
        "kind" => kind
    )
    .increment(1);
}

fn record_size_change(backend: &'static str, added: usize, removed: usize) {
    if added > 0 {
        counter!(names::BYTES_ADDED_TOTAL, "backend" => backend).increment(added as u64);
        gauge!(names::SIZE_BYTES, "backend" => backend).increment(added as f64);
    }
    if removed > 0 {
        counter!(names::BYTES_REMOVED_TOTAL, "backend" => backend).increment(removed as u64);
        gauge!(names::SIZE_BYTES, "backend" => backend).decrement(removed as f64);
    }
}
