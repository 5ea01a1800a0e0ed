//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by alpha_forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, Opts,
    Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all alpha_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of completed tasks, labeled by result status.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Task duration in seconds, from scheduling to completion.
pub static TASK_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Number of registered workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Workers replaced by the health check.
pub static WORKER_RESTARTS: OnceLock<IntCounter> = OnceLock::new();

/// Total HTTP attempts, labeled by api name and status (code or error class).
pub static HTTP_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// HTTP attempt latency in seconds, labeled by api name.
pub static HTTP_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Retries scheduled after a failed attempt, labeled by api name.
pub static HTTP_RETRIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Seconds spent waiting on exhausted rate-limit windows, labeled by api name.
pub static RATE_LIMIT_WAIT_SECONDS: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry but leave the
/// statics pointing at the first one.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Task metrics
    let tasks_total = CounterVec::new(
        Opts::new("alpha_forge_tasks_total", "Total number of completed tasks"),
        &["status"],
    )?;

    let task_duration = Histogram::with_opts(
        HistogramOpts::new(
            "alpha_forge_task_duration_seconds",
            "Task duration from scheduling to completion in seconds",
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
    )?;

    // Worker metrics
    let active_workers = Gauge::new("alpha_forge_active_workers", "Number of active workers")?;

    let worker_restarts = IntCounter::new(
        "alpha_forge_worker_restarts_total",
        "Workers replaced after missing the health check",
    )?;

    // HTTP metrics
    let http_requests_total = CounterVec::new(
        Opts::new("alpha_forge_http_requests_total", "Total HTTP attempts"),
        &["api_name", "status"],
    )?;

    let http_latency = HistogramVec::new(
        HistogramOpts::new(
            "alpha_forge_http_latency_seconds",
            "HTTP attempt latency in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["api_name"],
    )?;

    let http_retries_total = CounterVec::new(
        Opts::new("alpha_forge_http_retries_total", "Total HTTP retries"),
        &["api_name"],
    )?;

    let rate_limit_wait_seconds = CounterVec::new(
        Opts::new(
            "alpha_forge_rate_limit_wait_seconds_total",
            "Seconds spent waiting for rate-limit windows to reset",
        ),
        &["api_name"],
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(worker_restarts.clone()))?;
    registry.register(Box::new(http_requests_total.clone()))?;
    registry.register(Box::new(http_latency.clone()))?;
    registry.register(Box::new(http_retries_total.clone()))?;
    registry.register(Box::new(rate_limit_wait_seconds.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = WORKER_RESTARTS.set(worker_restarts);
    let _ = HTTP_REQUESTS_TOTAL.set(http_requests_total);
    let _ = HTTP_LATENCY.set(http_latency);
    let _ = HTTP_RETRIES_TOTAL.set(http_retries_total);
    let _ = RATE_LIMIT_WAIT_SECONDS.set(rate_limit_wait_seconds);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Writes the current metrics snapshot to `path`.
pub async fn write_metrics(path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
    tokio::fs::write(path, export_metrics()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();
        if let Some(tasks) = TASKS_TOTAL.get() {
            tasks.with_label_values(&["complete"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("alpha_forge_tasks_total"));
    }

    #[tokio::test]
    async fn test_write_metrics() {
        let _ = init_metrics();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");

        write_metrics(&path).await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.is_empty());
    }
}
