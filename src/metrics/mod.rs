//! Metrics module for Prometheus-based monitoring.
//!
//! Covers HTTP attempts, retries and rate-limit waits on the client side, and
//! task outcomes plus worker churn on the pool side.
//!
//! # Example
//!
//! ```ignore
//! use alpha_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_task("complete", 120.5);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, write_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, HTTP_LATENCY, HTTP_REQUESTS_TOTAL, HTTP_RETRIES_TOTAL,
    RATE_LIMIT_WAIT_SECONDS, REGISTRY, TASKS_TOTAL, TASK_DURATION, WORKER_RESTARTS,
};
