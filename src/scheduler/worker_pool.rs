//! Worker pool with health monitoring and dynamic scaling.
//!
//! The pool owns a set of [`Worker`]s, each running as its own tokio task.
//!
//! # Features
//!
//! - Idempotent start and graceful stop
//! - Scaling up and down at runtime (oldest workers are removed first, one
//!   always survives)
//! - Periodic health check restarting workers with no recent activity
//! - Throughput and failure statistics fed by the completion callback
//!
//! # Locking
//!
//! Structural changes (start, stop, scale, restart) take the registry lock.
//! Statistics and last-active times sit behind their own short-lived locks,
//! so completion callbacks and status reads never wait on a slow restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::sink::ResultSink;
use super::stats::{PoolStatistics, PoolStatus, DEFAULT_DURATION_WINDOW};
use super::task::{SimulationTask, TaskResult};
use super::worker::{TaskListener, Worker, WorkerFactory};
use crate::error::WorkerError;
use crate::metrics::MetricsCollector;

/// Bounds of the derived health check interval.
const MIN_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const MAX_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Workers did not drain within the shutdown timeout and were aborted.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Workers created by `start()`. At least one is always created.
    pub initial_workers: usize,
    /// A worker silent for longer than this is restarted. Zero disables the
    /// health check.
    pub worker_timeout: Duration,
    /// Overrides the derived health check interval.
    pub health_check_interval: Option<Duration>,
    /// Minimum time between two status log lines.
    pub status_log_interval: Duration,
    /// Time allowed for a graceful stop before workers are aborted.
    pub shutdown_timeout: Duration,
    /// Time allowed for a forced stop before the worker task is aborted.
    pub stop_grace_period: Duration,
    /// Number of recent task durations averaged in the status.
    pub duration_window: usize,
    pub dry_run: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 1,
            worker_timeout: Duration::from_secs(300),
            health_check_interval: None,
            status_log_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            stop_grace_period: Duration::from_secs(5),
            duration_window: DEFAULT_DURATION_WINDOW,
            dry_run: false,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(initial_workers: usize) -> Self {
        Self {
            initial_workers,
            ..Default::default()
        }
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    pub fn with_status_log_interval(mut self, interval: Duration) -> Self {
        self.status_log_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period = grace;
        self
    }

    pub fn with_duration_window(mut self, size: usize) -> Self {
        self.duration_window = size;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Interval of the health check, or `None` when it is disabled.
    ///
    /// Defaults to a tenth of the worker timeout, clamped to 5..=30 seconds.
    /// A zero override is ignored.
    pub fn effective_health_check_interval(&self) -> Option<Duration> {
        if self.worker_timeout.is_zero() {
            return None;
        }
        let configured = self.health_check_interval.filter(|i| !i.is_zero());
        Some(configured.unwrap_or_else(|| {
            (self.worker_timeout / 10).clamp(MIN_HEALTH_CHECK_INTERVAL, MAX_HEALTH_CHECK_INTERVAL)
        }))
    }
}

/// A registered worker and the task running its loop.
struct WorkerRecord {
    worker: Arc<dyn Worker>,
    handle: JoinHandle<()>,
    registered_at: DateTime<Utc>,
}

struct PoolInner {
    config: WorkerPoolConfig,
    factory: Arc<dyn WorkerFactory>,
    sink: Option<Arc<dyn ResultSink>>,
    running: AtomicBool,
    /// Registration order, oldest first.
    registry: tokio::sync::Mutex<Vec<WorkerRecord>>,
    worker_count: AtomicUsize,
    last_active: Mutex<HashMap<String, Instant>>,
    stats: Mutex<PoolStatistics>,
    health_check: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    metrics: MetricsCollector,
}

/// Pool of simulation workers.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a stopped pool that builds its workers with `factory`.
    pub fn new(config: WorkerPoolConfig, factory: Arc<dyn WorkerFactory>) -> Self {
        Self::build(config, factory, None)
    }

    /// Creates a stopped pool that forwards every completed task to `sink`.
    pub fn with_result_sink(
        config: WorkerPoolConfig,
        factory: Arc<dyn WorkerFactory>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self::build(config, factory, Some(sink))
    }

    fn build(
        config: WorkerPoolConfig,
        factory: Arc<dyn WorkerFactory>,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let stats = PoolStatistics::new(config.duration_window);

        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                sink,
                running: AtomicBool::new(false),
                registry: tokio::sync::Mutex::new(Vec::new()),
                worker_count: AtomicUsize::new(0),
                last_active: Mutex::new(HashMap::new()),
                stats: Mutex::new(stats),
                health_check: Mutex::new(None),
                shutdown_tx,
                metrics: MetricsCollector::new(),
            }),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    /// Starts the pool. Calling it on a running pool does nothing.
    ///
    /// Creates `max(initial_workers, 1)` workers; creation failures are
    /// logged and the pool runs with the workers that could be created.
    pub async fn start(&self) {
        let inner = &self.inner;
        let mut registry = inner.registry.lock().await;

        if inner.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return;
        }

        inner.shutdown_tx.send_replace(false);
        inner.stats().started_at = Some(Utc::now());

        let target = inner.config.initial_workers.max(1);
        let created = inner.spawn_workers(&mut registry, target).await;
        drop(registry);

        if created < target {
            warn!(created, target, "Worker pool started with fewer workers than requested");
        }

        if let Some(interval) = inner.config.effective_health_check_interval() {
            let shutdown_rx = inner.shutdown_tx.subscribe();
            let handle = tokio::spawn(health_check_loop(Arc::clone(inner), interval, shutdown_rx));
            *lock(&inner.health_check) = Some(handle);
            debug!(interval_secs = interval.as_secs_f64(), "Health check started");
        }

        info!(
            workers = created,
            dry_run = inner.config.dry_run,
            "Worker pool started"
        );
        inner.log_status();
    }

    /// Stops every worker gracefully. Calling it on a stopped pool does nothing.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers did not finish their
    /// current task within the shutdown timeout. They are aborted and the pool
    /// is stopped regardless.
    pub async fn stop(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            debug!("Worker pool not running");
            return Ok(());
        }

        info!("Stopping worker pool");
        inner.shutdown_tx.send_replace(true);

        let health_check = lock(&inner.health_check).take();
        if let Some(handle) = health_check {
            if let Err(e) = handle.await {
                warn!(error = %e, "Health check task ended abnormally");
            }
        }

        let records = {
            let mut registry = inner.registry.lock().await;
            let records = std::mem::take(&mut *registry);
            lock(&inner.last_active).clear();
            inner.set_worker_count(0);
            records
        };

        for record in &records {
            record.worker.stop(false).await;
        }

        let mut handles: Vec<JoinHandle<()>> = records.into_iter().map(|r| r.handle).collect();
        let drained = tokio::time::timeout(
            inner.config.shutdown_timeout,
            futures::future::join_all(handles.iter_mut()),
        )
        .await;

        match drained {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Worker task panicked during shutdown");
                    }
                }
                info!(status = %self.status(), "Worker pool stopped");
                Ok(())
            }
            Err(_) => {
                for handle in &handles {
                    handle.abort();
                }
                warn!(
                    timeout_secs = inner.config.shutdown_timeout.as_secs_f64(),
                    "Workers did not drain in time and were aborted"
                );
                Err(PoolError::ShutdownTimeout(inner.config.shutdown_timeout))
            }
        }
    }

    /// Adds `n` workers. Returns how many were actually created.
    pub async fn scale_up(&self, n: usize) -> usize {
        if n == 0 {
            warn!("Ignoring scale up by zero workers");
            return 0;
        }
        if !self.is_running() {
            warn!(requested = n, "Cannot scale up a stopped worker pool");
            return 0;
        }

        let mut registry = self.inner.registry.lock().await;
        let created = self.inner.spawn_workers(&mut registry, n).await;
        info!(requested = n, created, workers = registry.len(), "Scaled worker pool up");
        created
    }

    /// Removes up to `n` workers, oldest first, always keeping one.
    /// Returns how many were removed.
    pub async fn scale_down(&self, n: usize) -> usize {
        if n == 0 {
            warn!("Ignoring scale down by zero workers");
            return 0;
        }
        if !self.is_running() {
            warn!(requested = n, "Cannot scale down a stopped worker pool");
            return 0;
        }

        let inner = &self.inner;
        let mut registry = inner.registry.lock().await;
        let removable = n.min(registry.len().saturating_sub(1));
        if removable < n {
            warn!(
                requested = n,
                removing = removable,
                "Keeping at least one worker in the pool"
            );
        }

        let removed: Vec<WorkerRecord> = registry.drain(..removable).collect();
        {
            let mut last_active = lock(&inner.last_active);
            for record in &removed {
                last_active.remove(record.worker.id());
            }
        }
        inner.set_worker_count(registry.len());

        for record in removed {
            inner.stop_record(record, true).await;
        }

        info!(removed = removable, workers = registry.len(), "Scaled worker pool down");
        removable
    }

    /// Records a finished task. Workers created by this pool call it through
    /// their listener; it is safe to call concurrently.
    pub async fn on_task_completed(&self, task: SimulationTask, result: TaskResult) {
        self.inner.on_task_completed(task, result).await;
    }

    /// Listener that feeds completions and heartbeats into this pool.
    pub fn listener(&self) -> Arc<dyn TaskListener> {
        self.inner.listener()
    }

    /// Current status snapshot.
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.worker_count.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Ids of the registered workers, oldest first.
    pub async fn worker_ids(&self) -> Vec<String> {
        self.inner
            .registry
            .lock()
            .await
            .iter()
            .map(|r| r.worker.id().to_string())
            .collect()
    }

    /// Lazily yields the workers currently holding `task_id`. Workers whose
    /// task set cannot be read are skipped.
    pub fn find_workers_for_task(&self, task_id: u64) -> BoxStream<'static, Arc<dyn Worker>> {
        self.inner.find_workers_for_task(task_id)
    }
}

impl PoolInner {
    fn listener(self: &Arc<Self>) -> Arc<dyn TaskListener> {
        Arc::new(PoolListener {
            inner: Arc::downgrade(self),
        })
    }

    fn stats(&self) -> MutexGuard<'_, PoolStatistics> {
        lock(&self.stats)
    }

    fn set_worker_count(&self, count: usize) {
        self.worker_count.store(count, Ordering::SeqCst);
        self.metrics.set_active_workers(count);
    }

    /// Refreshes the last-active time of a registered worker.
    fn touch(&self, worker_id: &str) -> bool {
        match lock(&self.last_active).get_mut(worker_id) {
            Some(last) => {
                *last = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Creates, starts and registers `n` workers. Caller holds the registry lock.
    async fn spawn_workers(self: &Arc<Self>, registry: &mut Vec<WorkerRecord>, n: usize) -> usize {
        let mut created = 0;
        for _ in 0..n {
            match self.create_record().await {
                Ok(record) => {
                    debug!(worker_id = %record.worker.id(), "Registered worker");
                    registry.push(record);
                    created += 1;
                }
                Err(e) => {
                    error!(error = %e, "Failed to create worker");
                }
            }
        }
        self.set_worker_count(registry.len());
        created
    }

    async fn create_record(self: &Arc<Self>) -> Result<WorkerRecord, WorkerError> {
        let worker = self.factory.create_worker(self.listener()).await?;
        let worker_id = worker.id().to_string();

        lock(&self.last_active).insert(worker_id.clone(), Instant::now());
        match Arc::clone(&worker).run() {
            Some(handle) => Ok(WorkerRecord {
                worker,
                handle,
                registered_at: Utc::now(),
            }),
            None => {
                lock(&self.last_active).remove(&worker_id);
                Err(WorkerError::Creation(format!(
                    "worker {} was already running",
                    worker_id
                )))
            }
        }
    }

    /// Forced stop: cancel in-flight work and wait a grace period for the loop.
    async fn stop_record(&self, record: WorkerRecord, cancel_tasks: bool) {
        let WorkerRecord {
            worker,
            mut handle,
            registered_at,
        } = record;

        worker.stop(cancel_tasks).await;
        match tokio::time::timeout(self.config.stop_grace_period, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(worker_id = %worker.id(), error = %e, "Worker task ended abnormally");
            }
            Err(_) => {
                warn!(
                    worker_id = %worker.id(),
                    registered_at = %registered_at,
                    "Worker did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }

    fn stale_workers(&self, now: Instant) -> Vec<String> {
        let timeout = self.config.worker_timeout;
        lock(&self.last_active)
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Replaces a worker in the same registry slot.
    async fn restart_worker(self: &Arc<Self>, worker_id: &str) {
        let mut registry = self.registry.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let Some(index) = registry.iter().position(|r| r.worker.id() == worker_id) else {
            debug!(worker_id = %worker_id, "Worker already gone, skipping restart");
            return;
        };

        let stale = registry.remove(index);
        lock(&self.last_active).remove(worker_id);
        warn!(
            worker_id = %worker_id,
            timeout_secs = self.config.worker_timeout.as_secs_f64(),
            "Restarting unresponsive worker"
        );

        self.stop_record(stale, true).await;

        match self.create_record().await {
            Ok(record) => {
                info!(
                    old_worker_id = %worker_id,
                    new_worker_id = %record.worker.id(),
                    "Worker restarted"
                );
                registry.insert(index, record);
                self.metrics.record_worker_restart();
            }
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "Failed to create replacement worker");
            }
        }

        self.set_worker_count(registry.len());
    }

    /// A result is committed to the sink before it is counted.
    async fn on_task_completed(self: &Arc<Self>, task: SimulationTask, result: TaskResult) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.commit(&task, &result).await {
                warn!(task_id = task.id, error = %e, "Failed to commit task result");
            }
        }

        let success = result.is_success();
        let duration_secs = task
            .seconds_since_scheduled()
            .unwrap_or(result.duration_ms as f64 / 1000.0);

        let log_status = {
            let mut stats = self.stats();
            stats.record(success, Some(duration_secs));
            stats.claim_status_log(Instant::now(), self.config.status_log_interval)
        };

        if !self.touch(&result.worker_id) {
            let mut holders = self.find_workers_for_task(task.id);
            while let Some(worker) = holders.next().await {
                self.touch(worker.id());
            }
        }

        self.metrics
            .record_task(&result.status.to_string(), duration_secs);
        debug!(
            task_id = task.id,
            worker_id = %result.worker_id,
            status = %result.status,
            duration_secs,
            "Recorded task completion"
        );

        if log_status {
            self.log_status();
        }
    }

    fn find_workers_for_task(self: &Arc<Self>, task_id: u64) -> BoxStream<'static, Arc<dyn Worker>> {
        let inner = Arc::clone(self);
        Box::pin(async_stream::stream! {
            let workers: Vec<Arc<dyn Worker>> = inner
                .registry
                .lock()
                .await
                .iter()
                .map(|r| Arc::clone(&r.worker))
                .collect();

            for worker in workers {
                match worker.current_tasks().await {
                    Ok(tasks) => {
                        if tasks.iter().any(|t| t.id == task_id) {
                            yield worker;
                        }
                    }
                    Err(e) => {
                        warn!(worker_id = %worker.id(), error = %e, "Skipping worker whose tasks could not be read");
                    }
                }
            }
        })
    }

    fn status(&self) -> PoolStatus {
        let stats = self.stats();
        PoolStatus::from_statistics(
            &stats,
            self.running.load(Ordering::SeqCst),
            self.worker_count.load(Ordering::SeqCst),
            self.config.dry_run,
            self.config.effective_health_check_interval(),
        )
    }

    fn log_status(&self) {
        info!(status = %self.status(), "Worker pool status");
    }
}

async fn health_check_loop(
    inner: Arc<PoolInner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        if !inner.running.load(Ordering::SeqCst) {
            break;
        }

        let stale = inner.stale_workers(Instant::now());
        if !stale.is_empty() {
            warn!(count = stale.len(), "Found unresponsive workers");
        }
        for worker_id in stale {
            inner.restart_worker(&worker_id).await;
        }
    }

    debug!("Health check stopped");
}

/// Listener handed to workers. Holds the pool weakly so workers never keep a
/// dropped pool alive.
struct PoolListener {
    inner: Weak<PoolInner>,
}

#[async_trait]
impl TaskListener for PoolListener {
    async fn on_task_completed(&self, task: SimulationTask, result: TaskResult) {
        match self.inner.upgrade() {
            Some(inner) => inner.on_task_completed(task, result).await,
            None => debug!(task_id = task.id, "Pool dropped, discarding task result"),
        }
    }

    async fn on_heartbeat(&self, worker_id: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.touch(worker_id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
