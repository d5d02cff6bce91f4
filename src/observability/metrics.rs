use crate::error::{AppError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the idempotency guard and its store.
///
/// Recording is a no-op until a recorder is installed by [`init_metrics`].
#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    /// Outcome of a guarded call: `admitted`, `duplicate`,
    /// `signature_invalid`, `store_unavailable` or `operation_failed`.
    pub fn record_guard_outcome(&self, operation: &str, outcome: &str) {
        counter!("idempotency_guard_requests_total", "operation" => operation.to_string(), "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_store_operation(&self, operation: &str, duration_ms: f64, success: bool) {
        counter!("idempotency_store_operations_total", "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("idempotency_store_operation_duration_ms", "operation" => operation.to_string()).record(duration_ms);
    }

    pub fn record_cleanup_pass(&self, deleted: u64, failed: u64) {
        counter!("idempotency_cleanup_deleted_total").increment(deleted);
        counter!("idempotency_cleanup_failed_total").increment(failed);
    }

    pub fn record_orphan_deleted(&self) {
        counter!("idempotency_orphans_deleted_total").increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Configuration(format!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("idempotency_guard_requests_total", Unit::Count, "Guarded calls by outcome");

    describe_counter!("idempotency_store_operations_total", Unit::Count, "Total reservation store operations");
    describe_histogram!("idempotency_store_operation_duration_ms", Unit::Milliseconds, "Reservation store latency in milliseconds");

    describe_counter!("idempotency_cleanup_deleted_total", Unit::Count, "Reservation keys removed by the delayed cleanup worker");
    describe_counter!("idempotency_cleanup_failed_total", Unit::Count, "Delayed cleanup tasks that failed and were left queued");
    describe_counter!("idempotency_orphans_deleted_total", Unit::Count, "Reservation keys without expiry deleted by the orphan monitor");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
