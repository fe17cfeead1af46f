//! Prometheus export of the `tokencache_*` metrics.
//!
//! The store decorators record through the `metrics` facade; this module
//! installs the recorder that collects them and renders the text format.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use tokencache_core::metrics::names;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            describe_metrics();
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

fn describe_metrics() {
    use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

    describe_counter!(names::READS_TOTAL, "Completed token cache reads");
    describe_counter!(names::READ_MISSES_TOTAL, "Reads that found no partition");
    describe_counter!(names::WRITES_TOTAL, "Completed token cache writes");
    describe_counter!(names::REMOVES_TOTAL, "Completed partition removals");
    describe_counter!(names::BYTES_ADDED_TOTAL, Unit::Bytes, "Bytes written");
    describe_counter!(names::BYTES_REMOVED_TOTAL, Unit::Bytes, "Bytes overwritten or removed");
    describe_gauge!(names::SIZE_BYTES, Unit::Bytes, "Net bytes held by the store");
    describe_histogram!(names::READ_DURATION_SECONDS, Unit::Seconds, "Read latency");
    describe_histogram!(names::WRITE_DURATION_SECONDS, Unit::Seconds, "Write latency");
    describe_counter!(names::ERRORS_TOTAL, "Failed store operations");
}
