//! Throughput and failure statistics for the worker pool.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of recent task durations kept for averaging.
pub const DEFAULT_DURATION_WINDOW: usize = 100;

/// Bounded window of the most recent task durations, in seconds.
#[derive(Debug, Clone)]
pub struct DurationWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl DurationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Adds a duration, evicting the oldest once full.
    pub fn push(&mut self, seconds: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(seconds);
    }

    pub fn average(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for DurationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DURATION_WINDOW)
    }
}

/// Counters mutated by the completion callback.
#[derive(Debug, Clone, Default)]
pub struct PoolStatistics {
    pub processed: u64,
    pub failed: u64,
    pub durations: DurationWindow,
    pub started_at: Option<DateTime<Utc>>,
    last_status_log: Option<Instant>,
}

impl PoolStatistics {
    pub fn new(duration_window: usize) -> Self {
        Self {
            durations: DurationWindow::new(duration_window),
            ..Default::default()
        }
    }

    /// Records one completed task.
    pub fn record(&mut self, success: bool, duration_secs: Option<f64>) {
        self.processed += 1;
        if !success {
            self.failed += 1;
        }
        if let Some(secs) = duration_secs {
            self.durations.push(secs);
        }
    }

    /// `(processed - failed) / processed`, or `None` before the first task.
    pub fn success_rate(&self) -> Option<f64> {
        if self.processed == 0 {
            return None;
        }
        Some((self.processed - self.failed) as f64 / self.processed as f64)
    }

    pub fn uptime_seconds(&self) -> Option<f64> {
        self.started_at
            .map(|at| (Utc::now() - at).num_milliseconds().max(0) as f64 / 1000.0)
    }

    /// Returns true, and claims the slot, if no status line was logged within
    /// `interval`.
    pub fn claim_status_log(&mut self, now: Instant, interval: Duration) -> bool {
        match self.last_status_log {
            Some(last) if now.duration_since(last) < interval => false,
            _ => {
                self.last_status_log = Some(now);
                true
            }
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub running: bool,
    pub worker_count: usize,
    pub processed_tasks: u64,
    pub failed_tasks: u64,
    pub success_rate: Option<f64>,
    /// Mean over the recent duration window, in seconds.
    pub avg_task_duration: f64,
    pub uptime_seconds: Option<f64>,
    /// Reported once the pool has been up for more than a minute.
    pub tasks_per_minute: f64,
    pub dry_run: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub health_check_enabled: bool,
    pub health_check_interval_secs: f64,
}

impl PoolStatus {
    pub(crate) fn from_statistics(
        stats: &PoolStatistics,
        running: bool,
        worker_count: usize,
        dry_run: bool,
        health_check_interval: Option<Duration>,
    ) -> Self {
        let uptime_seconds = stats.uptime_seconds();
        let tasks_per_minute = match uptime_seconds {
            Some(uptime) if uptime > 60.0 => stats.processed as f64 / (uptime / 60.0),
            _ => 0.0,
        };

        Self {
            running,
            worker_count,
            processed_tasks: stats.processed,
            failed_tasks: stats.failed,
            success_rate: stats.success_rate(),
            avg_task_duration: stats.durations.average(),
            uptime_seconds,
            tasks_per_minute,
            dry_run,
            started_at: stats.started_at,
            health_check_enabled: health_check_interval.is_some(),
            health_check_interval_secs: health_check_interval
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        }
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let success = self
            .success_rate
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        write!(
            f,
            "running={} workers={} processed={} failed={} success={} avg={:.1}s rate={:.2}/min{}",
            self.running,
            self.worker_count,
            self.processed_tasks,
            self.failed_tasks,
            success,
            self.avg_task_duration,
            self.tasks_per_minute,
            if self.dry_run { " (dry run)" } else { "" }
        )
    }
}
