//! High-level recording interface over the Prometheus statics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code can
//! record unconditionally.

use super::prometheus::{
    ACTIVE_WORKERS, HTTP_LATENCY, HTTP_REQUESTS_TOTAL, HTTP_RETRIES_TOTAL,
    RATE_LIMIT_WAIT_SECONDS, TASKS_TOTAL, TASK_DURATION, WORKER_RESTARTS,
};

/// Metrics collector for recording alpha_forge operational metrics.
///
/// # Example
///
/// ```ignore
/// use alpha_forge::metrics::{MetricsCollector, init_metrics};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.record_http_request("simulations.create", "201", 0.35);
/// collector.record_task("complete", 182.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a completed task.
    ///
    /// # Arguments
    ///
    /// * `status` - Result status (e.g., "complete", "error", "timeout")
    /// * `duration_secs` - Time from scheduling to completion
    pub fn record_task(&self, status: &str, duration_secs: f64) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[status]).inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration.observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    /// Record one HTTP attempt.
    ///
    /// # Arguments
    ///
    /// * `api_name` - Logical endpoint name
    /// * `status` - Status code, or the error class when no response arrived
    /// * `latency_secs` - Attempt latency in seconds
    pub fn record_http_request(&self, api_name: &str, status: &str, latency_secs: f64) {
        if let Some(requests) = HTTP_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[api_name, status]).inc();
        }

        if let Some(latency) = HTTP_LATENCY.get() {
            latency.with_label_values(&[api_name]).observe(latency_secs);
        }

        tracing::trace!(
            api_name = api_name,
            status = status,
            latency_secs = latency_secs,
            "Recorded HTTP request metric"
        );
    }

    pub fn record_retry(&self, api_name: &str) {
        if let Some(retries) = HTTP_RETRIES_TOTAL.get() {
            retries.with_label_values(&[api_name]).inc();
        }
    }

    /// Record time spent blocked on an exhausted rate-limit window.
    pub fn record_rate_limit_wait(&self, api_name: &str, wait_secs: f64) {
        if let Some(waits) = RATE_LIMIT_WAIT_SECONDS.get() {
            waits.with_label_values(&[api_name]).inc_by(wait_secs);
        }

        tracing::trace!(
            api_name = api_name,
            wait_secs = wait_secs,
            "Recorded rate limit wait"
        );
    }

    /// Update the count of active workers.
    pub fn set_active_workers(&self, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.set(count as f64);
        }

        tracing::trace!(count = count, "Updated active workers metric");
    }

    pub fn record_worker_restart(&self) {
        if let Some(restarts) = WORKER_RESTARTS.get() {
            restarts.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_http_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_http_request("simulations.create", "201", 0.4);
        collector.record_http_request("simulations.create", "transient", 30.0);
        collector.record_retry("simulations.create");
        collector.record_rate_limit_wait("simulations.create", 1.5);

        let exported = export_metrics();
        assert!(exported.contains("alpha_forge_http_requests_total"));
        assert!(exported.contains("simulations.create"));
    }

    #[test]
    fn test_record_pool_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_task("complete", 120.5);
        collector.record_task("timeout", 1800.0);
        collector.set_active_workers(4);
        collector.record_worker_restart();

        assert!(export_metrics().contains("alpha_forge_worker_restarts_total"));
    }
}
