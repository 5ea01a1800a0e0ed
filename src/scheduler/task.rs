//! Task definitions for the scheduler.
//!
//! - `SimulationTask`: a simulation to submit, as handed out by a scheduler
//! - `TaskStatus`: lifecycle of a task
//! - `TaskResult`: outcome reported to the pool for one task
//! - `ResultStatus`: terminal status of a result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::SimulationOutcome;

/// Lifecycle status of a simulation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Complete,
    Error,
    Cancelled,
    NotSchedulable,
}

impl TaskStatus {
    /// Returns true for states a task never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Scheduled => write!(f, "SCHEDULED"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Complete => write!(f, "COMPLETE"),
            TaskStatus::Error => write!(f, "ERROR"),
            TaskStatus::Cancelled => write!(f, "CANCELLED"),
            TaskStatus::NotSchedulable => write!(f, "NOT_SCHEDULABLE"),
        }
    }
}

/// A simulation to run on the platform.
///
/// `payload` is the simulation settings document and is sent as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationTask {
    pub id: u64,
    pub status: TaskStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SimulationTask {
    pub fn new(id: u64, payload: serde_json::Value) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            priority: 0,
            payload,
            scheduled_at: None,
            progress_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Seconds since the task was scheduled, if it was.
    pub fn seconds_since_scheduled(&self) -> Option<f64> {
        self.scheduled_at
            .map(|at| (Utc::now() - at).num_milliseconds().max(0) as f64 / 1000.0)
    }
}

impl PartialEq for SimulationTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SimulationTask {}

/// Terminal status of a task result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Complete,
    Error,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultStatus::Complete => write!(f, "complete"),
            ResultStatus::Error => write!(f, "error"),
            ResultStatus::Timeout => write!(f, "timeout"),
            ResultStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one task, reported by the worker that ran it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: u64,
    pub status: ResultStatus,
    pub progress_id: Option<String>,
    /// Identifier of the alpha produced by a completed simulation.
    pub alpha_id: Option<String>,
    pub message: Option<String>,
    /// Raw terminal payload from the platform.
    pub payload: Option<serde_json::Value>,
    pub worker_id: String,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Builds a result from the platform's terminal payload. Any remote status
    /// other than `COMPLETE` counts as an error.
    pub fn from_outcome(
        task_id: u64,
        worker_id: impl Into<String>,
        progress_id: Option<String>,
        outcome: SimulationOutcome,
        duration_ms: u64,
    ) -> Self {
        let status = if outcome.is_complete() {
            ResultStatus::Complete
        } else {
            ResultStatus::Error
        };

        Self {
            task_id,
            status,
            progress_id,
            alpha_id: outcome.alpha.clone(),
            message: outcome.message.clone(),
            payload: serde_json::to_value(&outcome).ok(),
            worker_id: worker_id.into(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(
        task_id: u64,
        worker_id: impl Into<String>,
        progress_id: Option<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id,
            status: ResultStatus::Error,
            progress_id,
            alpha_id: None,
            message: Some(error.into()),
            payload: None,
            worker_id: worker_id.into(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn timeout(
        task_id: u64,
        worker_id: impl Into<String>,
        progress_id: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id,
            status: ResultStatus::Timeout,
            progress_id,
            alpha_id: None,
            message: Some("Simulation exceeded its wall-clock budget".to_string()),
            payload: None,
            worker_id: worker_id.into(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Complete
    }

    /// Status the task ends in once this result is recorded.
    pub fn task_status(&self) -> TaskStatus {
        match self.status {
            ResultStatus::Complete => TaskStatus::Complete,
            ResultStatus::Cancelled => TaskStatus::Cancelled,
            ResultStatus::Error | ResultStatus::Timeout => TaskStatus::Error,
        }
    }
}
