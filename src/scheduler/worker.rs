//! Simulation workers.
//!
//! A worker owns one logical slot on the platform. Its loop asks the
//! scheduler for work, submits each task, polls it until the platform reports
//! a terminal payload and hands the outcome to a [`TaskListener`].
//!
//! ```text
//!   Idle ──schedule()──▶ Submitting ──201──▶ Polling ──terminal──▶ Completed/Failed
//!    ▲                                                                   │
//!    └───────────────────────────── on_task_completed ───────────────────┘
//! ```
//!
//! Per-task failures become error results; they never end the loop. Only
//! [`Worker::stop`] does.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::Scheduler;
use super::task::{SimulationTask, TaskResult, TaskStatus};
use crate::client::rate_limit::hint_duration;
use crate::client::{ClientConfig, PlatformClient, SimulationOutcome, SimulationProgress};
use crate::error::{ClientError, WorkerError};

/// Receives task outcomes and liveness signals from workers.
#[async_trait]
pub trait TaskListener: Send + Sync {
    /// Called exactly once per task that reached a terminal state.
    async fn on_task_completed(&self, task: SimulationTask, result: TaskResult);

    /// Called while a worker is making progress, idle or not.
    async fn on_heartbeat(&self, _worker_id: &str) {}
}

/// A unit of execution managed by the pool.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    /// Starts the worker loop and returns its handle, or `None` if the loop
    /// is already running.
    fn run(self: Arc<Self>) -> Option<JoinHandle<()>>;

    /// Asks the loop to exit. With `cancel_tasks` the in-flight task is
    /// abandoned at once; otherwise its poll cycle finishes first.
    async fn stop(&self, cancel_tasks: bool);

    /// Snapshot of the tasks currently held by this worker.
    async fn current_tasks(&self) -> Result<Vec<SimulationTask>, WorkerError>;

    fn is_running(&self) -> bool;
}

/// Creates workers for the pool.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn create_worker(
        &self,
        listener: Arc<dyn TaskListener>,
    ) -> Result<Arc<dyn Worker>, WorkerError>;
}

/// Builds a fresh platform client for each worker.
pub type ClientFactory = Arc<dyn Fn() -> Result<PlatformClient, ClientError> + Send + Sync>;

/// Configuration for simulation workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tasks requested per `schedule()` call.
    pub batch_size: usize,
    /// Sleep between empty `schedule()` calls.
    pub idle_backoff: Duration,
    /// Poll delay used when the platform sends no `Retry-After`.
    pub default_poll_interval: Duration,
    /// Wall-clock budget for submit plus polling of one task.
    pub task_timeout: Duration,
    /// A `schedule()` call slower than this counts as no work.
    pub schedule_timeout: Duration,
    /// Complete tasks locally without calling the platform.
    pub dry_run: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            idle_backoff: Duration::from_secs(1),
            default_poll_interval: Duration::from_secs(5),
            task_timeout: Duration::from_secs(1800), // 30 minutes
            schedule_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

impl WorkerConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn with_default_poll_interval(mut self, interval: Duration) -> Self {
        self.default_poll_interval = interval;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_schedule_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_timeout = timeout;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerSignal {
    Run,
    Drain,
    Cancel,
}

fn current_signal(rx: &watch::Receiver<WorkerSignal>) -> WorkerSignal {
    *rx.borrow()
}

/// Worker that runs simulations against the platform.
pub struct SimulationWorker {
    id: String,
    scheduler: Arc<dyn Scheduler>,
    platform: Arc<PlatformClient>,
    listener: Arc<dyn TaskListener>,
    config: WorkerConfig,
    current: Mutex<Vec<SimulationTask>>,
    signal: watch::Sender<WorkerSignal>,
    running: AtomicBool,
}

impl SimulationWorker {
    pub fn new(
        id: impl Into<String>,
        scheduler: Arc<dyn Scheduler>,
        platform: Arc<PlatformClient>,
        listener: Arc<dyn TaskListener>,
        config: WorkerConfig,
    ) -> Self {
        let (signal, _) = watch::channel(WorkerSignal::Run);
        Self {
            id: id.into(),
            scheduler,
            platform,
            listener,
            config,
            current: Mutex::new(Vec::new()),
            signal,
            running: AtomicBool::new(false),
        }
    }

    async fn run_loop(self: Arc<Self>, mut signal_rx: watch::Receiver<WorkerSignal>) {
        info!(worker_id = %self.id, dry_run = self.config.dry_run, "Worker started");

        while current_signal(&signal_rx) == WorkerSignal::Run {
            self.listener.on_heartbeat(&self.id).await;

            let batch = self.next_batch().await;
            if batch.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_backoff) => {}
                    _ = signal_rx.changed() => {}
                }
                continue;
            }

            let mut batch = batch.into_iter();
            while let Some(task) = batch.next() {
                if current_signal(&signal_rx) != WorkerSignal::Run {
                    let unstarted: Vec<u64> =
                        std::iter::once(task.id).chain(batch.map(|t| t.id)).collect();
                    warn!(
                        worker_id = %self.id,
                        task_ids = ?unstarted,
                        "Stopping with scheduled tasks not started"
                    );
                    break;
                }

                if !self.run_task(task, &mut signal_rx).await {
                    break;
                }
            }
        }

        self.lock_current().clear();
        self.running.store(false, Ordering::SeqCst);
        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn next_batch(&self) -> Vec<SimulationTask> {
        let batch_size = self.config.batch_size.max(1);
        match tokio::time::timeout(
            self.config.schedule_timeout,
            self.scheduler.schedule(batch_size),
        )
        .await
        {
            Ok(Ok(tasks)) => tasks,
            Ok(Err(e)) => {
                let err = WorkerError::from(e);
                warn!(
                    worker_id = %self.id,
                    class = %err.class(),
                    error = %err,
                    "Scheduler failed, treating as no work"
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    worker_id = %self.id,
                    timeout_secs = self.config.schedule_timeout.as_secs_f64(),
                    "Scheduler stalled, treating as no work"
                );
                Vec::new()
            }
        }
    }

    /// Runs one task, racing submit and poll against a cancel signal. Returns
    /// false if the task was abandoned.
    ///
    /// Once a terminal result exists the listener runs to completion; a
    /// cancel only ends the loop after it returns.
    async fn run_task(
        &self,
        task: SimulationTask,
        signal_rx: &mut watch::Receiver<WorkerSignal>,
    ) -> bool {
        let task_id = task.id;
        let work = self.process_task(task);
        tokio::pin!(work);

        let (task, result) = loop {
            tokio::select! {
                finished = &mut work => break finished,
                changed = signal_rx.changed() => {
                    if changed.is_err() || current_signal(signal_rx) == WorkerSignal::Cancel {
                        // Left Running; the persistence layer requeues stale tasks.
                        warn!(worker_id = %self.id, task_id, "Abandoning in-flight task");
                        self.remove_current(task_id);
                        return false;
                    }
                    debug!(worker_id = %self.id, task_id, "Drain requested, finishing current task");
                }
            }
        };

        // The task stays visible in `current_tasks` until the listener returns.
        self.listener.on_task_completed(task, result).await;
        self.remove_current(task_id);
        true
    }

    /// Submits and polls one task up to its terminal result.
    async fn process_task(&self, mut task: SimulationTask) -> (SimulationTask, TaskResult) {
        let started = Instant::now();
        task.status = TaskStatus::Running;
        task.scheduled_at.get_or_insert_with(Utc::now);
        self.lock_current().push(task.clone());

        info!(
            worker_id = %self.id,
            task_id = task.id,
            priority = task.priority,
            "Processing task"
        );

        let outcome = tokio::time::timeout(self.config.task_timeout, self.execute(&task)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok((progress_id, outcome))) => {
                TaskResult::from_outcome(task.id, &self.id, Some(progress_id), outcome, duration_ms)
            }
            Ok(Err(e)) => {
                warn!(
                    worker_id = %self.id,
                    task_id = task.id,
                    class = %e.class(),
                    error = %e,
                    "Task failed"
                );
                TaskResult::failure(
                    task.id,
                    &self.id,
                    self.progress_id_of(task.id),
                    e.to_string(),
                    duration_ms,
                )
            }
            Err(_) => {
                let err = WorkerError::TaskTimeout {
                    task_id: task.id,
                    timeout: self.config.task_timeout,
                };
                warn!(worker_id = %self.id, task_id = task.id, error = %err, "Task timed out");

                let progress_id = self.progress_id_of(task.id);
                if let (Some(pid), false) = (&progress_id, self.config.dry_run) {
                    if let Err(e) = self.platform.delete_simulation(pid).await {
                        debug!(
                            worker_id = %self.id,
                            progress_id = %pid,
                            error = %e,
                            "Could not delete timed out simulation"
                        );
                    }
                }
                TaskResult::timeout(task.id, &self.id, progress_id, duration_ms)
            }
        };

        task.progress_id = result.progress_id.clone();
        task.status = result.task_status();

        info!(
            worker_id = %self.id,
            task_id = task.id,
            status = %result.status,
            alpha_id = ?result.alpha_id,
            duration_ms,
            "Task finished"
        );

        (task, result)
    }

    /// Submits the task and polls until a terminal payload arrives.
    async fn execute(
        &self,
        task: &SimulationTask,
    ) -> Result<(String, SimulationOutcome), WorkerError> {
        if self.config.dry_run {
            let progress_id = format!("dry-run-{}", task.id);
            self.set_progress_id(task.id, &progress_id);
            return Ok((
                progress_id.clone(),
                SimulationOutcome {
                    id: Some(progress_id),
                    status: SimulationOutcome::STATUS_COMPLETE.to_string(),
                    message: Some("dry run".to_string()),
                    alpha: None,
                },
            ));
        }

        let handle = self.platform.create_simulation(&task.payload).await?;
        self.set_progress_id(task.id, &handle.progress_id);
        let mut wait = self.poll_delay(handle.retry_after);

        loop {
            tokio::time::sleep(wait).await;
            self.listener.on_heartbeat(&self.id).await;

            match self.platform.get_progress(&handle.progress_id).await? {
                SimulationProgress::Running {
                    progress,
                    retry_after,
                } => {
                    debug!(
                        worker_id = %self.id,
                        task_id = task.id,
                        progress = ?progress,
                        retry_after,
                        "Simulation still running"
                    );
                    wait = self.poll_delay(Some(retry_after));
                }
                SimulationProgress::Finished(outcome) => {
                    return Ok((handle.progress_id, outcome));
                }
            }
        }
    }

    /// Delay before the next poll. Server hints never exceed the task timeout.
    fn poll_delay(&self, hint: Option<f64>) -> Duration {
        hint.filter(|secs| secs.is_finite())
            .and_then(hint_duration)
            .map(|delay| delay.min(self.config.task_timeout))
            .unwrap_or(self.config.default_poll_interval)
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Vec<SimulationTask>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_progress_id(&self, task_id: u64, progress_id: &str) {
        if let Some(task) = self.lock_current().iter_mut().find(|t| t.id == task_id) {
            task.progress_id = Some(progress_id.to_string());
        }
    }

    fn progress_id_of(&self, task_id: u64) -> Option<String> {
        self.lock_current()
            .iter()
            .find(|t| t.id == task_id)
            .and_then(|t| t.progress_id.clone())
    }

    fn remove_current(&self, task_id: u64) {
        self.lock_current().retain(|t| t.id != task_id);
    }
}

#[async_trait]
impl Worker for SimulationWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(worker_id = %self.id, "Worker already running");
            return None;
        }

        self.signal.send_replace(WorkerSignal::Run);
        let signal_rx = self.signal.subscribe();
        Some(tokio::spawn(self.run_loop(signal_rx)))
    }

    async fn stop(&self, cancel_tasks: bool) {
        let requested = if cancel_tasks {
            WorkerSignal::Cancel
        } else {
            WorkerSignal::Drain
        };

        // A drain request never downgrades an earlier cancel.
        let changed = self.signal.send_if_modified(|signal| {
            if *signal == requested || *signal == WorkerSignal::Cancel {
                return false;
            }
            *signal = requested;
            true
        });

        if changed {
            info!(worker_id = %self.id, cancel_tasks, "Stopping worker");
        }
    }

    async fn current_tasks(&self) -> Result<Vec<SimulationTask>, WorkerError> {
        Ok(self.lock_current().clone())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Creates [`SimulationWorker`]s with their own platform client each.
pub struct SimulationWorkerFactory {
    scheduler: Arc<dyn Scheduler>,
    client_factory: ClientFactory,
    config: WorkerConfig,
    next_id: AtomicU64,
}

impl SimulationWorkerFactory {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        client_factory: ClientFactory,
        config: WorkerConfig,
    ) -> Self {
        Self {
            scheduler,
            client_factory,
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// Factory whose workers each build a client from `client_config`.
    pub fn from_client_config(
        scheduler: Arc<dyn Scheduler>,
        client_config: ClientConfig,
        config: WorkerConfig,
    ) -> Self {
        let client_factory: ClientFactory =
            Arc::new(move || PlatformClient::new(client_config.clone()));
        Self::new(scheduler, client_factory, config)
    }
}

#[async_trait]
impl WorkerFactory for SimulationWorkerFactory {
    async fn create_worker(
        &self,
        listener: Arc<dyn TaskListener>,
    ) -> Result<Arc<dyn Worker>, WorkerError> {
        let id = format!("worker-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let platform = (self.client_factory)()?;

        if !self.config.dry_run && platform.has_credentials() {
            platform.authenticate().await?;
        }

        debug!(worker_id = %id, "Created worker");
        Ok(Arc::new(SimulationWorker::new(
            id,
            Arc::clone(&self.scheduler),
            Arc::new(platform),
            listener,
            self.config.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::SchedulerError;
    use crate::scheduler::queue::InMemoryScheduler;
    use crate::scheduler::task::ResultStatus;

    #[derive(Default)]
    struct RecordingListener {
        completed: Mutex<Vec<(SimulationTask, TaskResult)>>,
        heartbeats: AtomicUsize,
    }

    impl RecordingListener {
        fn completed(&self) -> Vec<(SimulationTask, TaskResult)> {
            self.completed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskListener for RecordingListener {
        async fn on_task_completed(&self, task: SimulationTask, result: TaskResult) {
            self.completed.lock().unwrap().push((task, result));
        }

        async fn on_heartbeat(&self, _worker_id: &str) {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn scheduler_with(ids: &[u64]) -> Arc<InMemoryScheduler> {
        Arc::new(
            InMemoryScheduler::with_tasks(
                ids.iter()
                    .map(|id| SimulationTask::new(*id, json!({"regular": "rank(close)"}))),
            )
            .unwrap(),
        )
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default()
            .with_idle_backoff(Duration::from_millis(10))
            .with_default_poll_interval(Duration::from_millis(10))
    }

    fn worker(
        base_url: &str,
        scheduler: Arc<InMemoryScheduler>,
        listener: Arc<RecordingListener>,
        config: WorkerConfig,
    ) -> Arc<SimulationWorker> {
        let platform = PlatformClient::new(
            ClientConfig::new(base_url)
                .with_max_retries(0)
                .with_backoff_factor(0.0),
        )
        .unwrap();
        Arc::new(SimulationWorker::new(
            "worker-test",
            scheduler,
            Arc::new(platform),
            listener,
            config,
        ))
    }

    #[tokio::test]
    async fn test_dry_run_completes_every_task_once() {
        let listener = Arc::new(RecordingListener::default());
        let worker = worker(
            "http://127.0.0.1:9",
            scheduler_with(&[1, 2, 3]),
            listener.clone(),
            fast_config().with_dry_run(true),
        );

        let handle = worker.clone().run().expect("first run starts the loop");
        wait_until(|| listener.completed().len() == 3).await;

        worker.stop(false).await;
        handle.await.unwrap();

        let completed = listener.completed();
        assert_eq!(completed.len(), 3);
        for (task, result) in &completed {
            assert_eq!(task.status, TaskStatus::Complete);
            assert!(result.is_success());
            assert_eq!(result.worker_id, "worker-test");
        }
        assert!(listener.heartbeats.load(Ordering::SeqCst) > 0);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let listener = Arc::new(RecordingListener::default());
        let worker = worker(
            "http://127.0.0.1:9",
            scheduler_with(&[]),
            listener,
            fast_config(),
        );

        let handle = worker.clone().run();
        assert!(handle.is_some());
        assert!(worker.clone().run().is_none());
        assert!(worker.is_running());

        worker.stop(false).await;
        worker.stop(false).await;
        handle.unwrap().await.unwrap();
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_submission_error_reported_and_loop_continues() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid expression"))
            .expect(2)
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let worker = worker(&server.uri(), scheduler_with(&[1, 2]), listener.clone(), fast_config());

        let handle = worker.clone().run().unwrap();
        wait_until(|| listener.completed().len() == 2).await;
        worker.stop(false).await;
        handle.await.unwrap();

        for (task, result) in listener.completed() {
            assert_eq!(task.status, TaskStatus::Error);
            assert_eq!(result.status, ResultStatus::Error);
            assert!(result.message.unwrap().contains("400"));
        }
    }

    #[tokio::test]
    async fn test_cancel_abandons_in_flight_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", "/simulations/slow")
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let worker = worker(&server.uri(), scheduler_with(&[42]), listener.clone(), fast_config());

        let handle = worker.clone().run().unwrap();
        let probe = worker.clone();
        wait_until(move || {
            probe
                .current
                .lock()
                .unwrap()
                .iter()
                .any(|t| t.id == 42 && t.status == TaskStatus::Running)
        })
        .await;

        worker.stop(true).await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cancelled worker exits promptly")
            .unwrap();

        assert!(listener.completed().is_empty());
        assert!(worker.current_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fails_task_and_deletes_simulation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", "/simulations/stuck")
                    .insert_header("Retry-After", "0.02"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Retry-After", "0.02")
                    .set_body_json(json!({"progress": 0.1})),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let worker = worker(
            &server.uri(),
            scheduler_with(&[5]),
            listener.clone(),
            fast_config().with_task_timeout(Duration::from_millis(200)),
        );

        let handle = worker.clone().run().unwrap();
        wait_until(|| listener.completed().len() == 1).await;
        worker.stop(false).await;
        handle.await.unwrap();

        let (task, result) = listener.completed().remove(0);
        assert_eq!(result.status, ResultStatus::Timeout);
        assert_eq!(result.progress_id.as_deref(), Some("stuck"));
        assert_eq!(task.status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_oversized_retry_after_is_capped_by_task_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", "/simulations/p")
                    .insert_header("Retry-After", "1e20"),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let listener = Arc::new(RecordingListener::default());
        let worker = worker(
            &server.uri(),
            scheduler_with(&[6]),
            listener.clone(),
            fast_config().with_task_timeout(Duration::from_millis(200)),
        );

        let handle = worker.clone().run().unwrap();
        wait_until(|| listener.completed().len() == 1).await;
        assert!(worker.is_running());
        assert!(!handle.is_finished());

        worker.stop(false).await;
        handle.await.expect("worker loop does not panic");

        let (_, result) = listener.completed().remove(0);
        assert_eq!(result.status, ResultStatus::Timeout);
        assert_eq!(result.progress_id.as_deref(), Some("p"));
    }

    #[tokio::test]
    async fn test_drain_finishes_poll_cycle_and_reports() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", "/simulations/drain")
                    .insert_header("Retry-After", "0.3"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "drain",
                "status": "COMPLETE",
                "alpha": "alpha-drain"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let scheduler = scheduler_with(&[7, 8]);
        let listener = Arc::new(RecordingListener::default());
        let worker = worker(&server.uri(), scheduler.clone(), listener.clone(), fast_config());

        let handle = worker.clone().run().unwrap();
        let submitted = worker.clone();
        wait_until(move || {
            submitted
                .current
                .lock()
                .unwrap()
                .iter()
                .any(|t| t.id == 7 && t.progress_id.as_deref() == Some("drain"))
        })
        .await;

        worker.stop(false).await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("drained worker exits after its poll cycle")
            .unwrap();

        let completed = listener.completed();
        assert_eq!(completed.len(), 1);
        let (task, result) = &completed[0];
        assert_eq!(task.id, 7);
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(result.status, ResultStatus::Complete);
        assert_eq!(result.alpha_id.as_deref(), Some("alpha-drain"));
        assert!(!worker.is_running());
        assert_eq!(scheduler.len(), 1);
    }

    /// Listener whose completion callback takes a while.
    #[derive(Default)]
    struct SlowListener {
        entered: AtomicBool,
        completed: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl TaskListener for SlowListener {
        async fn on_task_completed(&self, task: SimulationTask, _result: TaskResult) {
            self.entered.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.completed.lock().unwrap().push(task.id);
        }
    }

    #[tokio::test]
    async fn test_cancel_waits_for_running_callback() {
        let listener = Arc::new(SlowListener::default());
        let platform = PlatformClient::new(ClientConfig::new("http://127.0.0.1:9")).unwrap();
        let worker = Arc::new(SimulationWorker::new(
            "worker-slow",
            scheduler_with(&[1, 2]),
            Arc::new(platform),
            listener.clone(),
            fast_config().with_dry_run(true),
        ));

        let handle = worker.clone().run().unwrap();
        wait_until(|| listener.entered.load(Ordering::SeqCst)).await;

        worker.stop(true).await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cancelled worker exits after the callback")
            .unwrap();

        assert_eq!(*listener.completed.lock().unwrap(), vec![1]);
        assert!(worker.current_tasks().await.unwrap().is_empty());
    }

    struct UnavailableScheduler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Scheduler for UnavailableScheduler {
        async fn schedule(&self, _batch_size: usize) -> Result<Vec<SimulationTask>, SchedulerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SchedulerError::Unavailable("store offline".to_string()))
        }

        async fn has_tasks(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_scheduler_errors_do_not_end_loop() {
        let scheduler = Arc::new(UnavailableScheduler {
            calls: AtomicUsize::new(0),
        });
        let listener = Arc::new(RecordingListener::default());
        let platform = PlatformClient::new(ClientConfig::new("http://127.0.0.1:9")).unwrap();
        let worker = Arc::new(SimulationWorker::new(
            "worker-idle",
            scheduler.clone(),
            Arc::new(platform),
            listener.clone(),
            fast_config(),
        ));

        let handle = worker.clone().run().unwrap();
        wait_until(|| scheduler.calls.load(Ordering::SeqCst) >= 3).await;
        assert!(worker.is_running());
        assert!(listener.completed().is_empty());

        worker.stop(false).await;
        handle.await.unwrap();
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_factory_assigns_unique_ids() {
        let factory = SimulationWorkerFactory::from_client_config(
            scheduler_with(&[]),
            ClientConfig::new("http://127.0.0.1:9"),
            WorkerConfig::default().with_dry_run(true),
        );
        let listener: Arc<dyn TaskListener> = Arc::new(RecordingListener::default());

        let a = factory.create_worker(listener.clone()).await.unwrap();
        let b = factory.create_worker(listener).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert!(!a.is_running());
    }
}
