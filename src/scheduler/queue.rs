//! Task sources for workers.
//!
//! [`Scheduler`] is the seam between the execution core and whatever decides
//! which simulation runs next. Workers only ever call `schedule()`; selection
//! policy lives behind it.
//!
//! [`InMemoryScheduler`] is a priority-ordered queue good enough for the CLI
//! and tests. Higher priority is handed out first and equal priorities keep
//! insertion order.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::task::{SimulationTask, TaskStatus};
use crate::error::SchedulerError;

/// Supplies batches of ready tasks to workers.
///
/// Implementations must return promptly; workers treat a call that stalls past
/// their schedule timeout as "no work".
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Returns up to `batch_size` tasks, already marked `Scheduled`. An empty
    /// vector means no work is currently available.
    async fn schedule(&self, batch_size: usize) -> Result<Vec<SimulationTask>, SchedulerError>;

    /// Returns true while the scheduler may still hand out tasks.
    async fn has_tasks(&self) -> bool;
}

/// In-process priority queue of pending tasks.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    pending: Mutex<Vec<SimulationTask>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = SimulationTask>) -> Result<Self, SchedulerError> {
        let scheduler = Self::new();
        scheduler.add_tasks(tasks)?;
        Ok(scheduler)
    }

    /// Queues a task.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotSchedulable` unless the task is `Pending`.
    pub fn add_task(&self, task: SimulationTask) -> Result<(), SchedulerError> {
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::NotSchedulable {
                id: task.id,
                status: task.status.to_string(),
            });
        }

        let mut pending = self.lock();
        // Keep descending priority; equal priorities stay FIFO.
        let index = pending.partition_point(|queued| queued.priority >= task.priority);
        pending.insert(index, task);
        Ok(())
    }

    /// Queues several tasks, stopping at the first one that is not `Pending`.
    pub fn add_tasks(
        &self,
        tasks: impl IntoIterator<Item = SimulationTask>,
    ) -> Result<usize, SchedulerError> {
        let mut added = 0;
        for task in tasks {
            self.add_task(task)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SimulationTask>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    async fn schedule(&self, batch_size: usize) -> Result<Vec<SimulationTask>, SchedulerError> {
        let mut pending = self.lock();
        let take = batch_size.min(pending.len());
        let now = Utc::now();

        let batch: Vec<SimulationTask> = pending
            .drain(..take)
            .map(|mut task| {
                task.status = TaskStatus::Scheduled;
                task.scheduled_at = Some(now);
                task
            })
            .collect();

        if !batch.is_empty() {
            debug!(
                count = batch.len(),
                remaining = pending.len(),
                "Scheduled tasks"
            );
        }

        Ok(batch)
    }

    async fn has_tasks(&self) -> bool {
        !self.is_empty()
    }
}
