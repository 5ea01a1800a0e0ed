//! Result persistence.
//!
//! The pool forwards every completed task to a [`ResultSink`]. Commit failures
//! are logged by the pool and never retried.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::task::{SimulationTask, TaskResult};
use crate::error::SinkError;

/// Durable destination for task outcomes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn commit(&self, task: &SimulationTask, result: &TaskResult) -> Result<(), SinkError>;
}

/// Keeps committed results in memory.
#[derive(Debug, Default)]
pub struct InMemoryResultSink {
    committed: Mutex<Vec<(SimulationTask, TaskResult)>>,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<(SimulationTask, TaskResult)> {
        match self.committed.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.committed.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn commit(&self, task: &SimulationTask, result: &TaskResult) -> Result<(), SinkError> {
        let mut committed = match self.committed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        committed.push((task.clone(), result.clone()));
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    task: &'a SimulationTask,
    result: &'a TaskResult,
}

/// Appends one JSON object per completed task to a file.
pub struct JsonlResultSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlResultSink {
    /// Opens `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonlResultSink {
    async fn commit(&self, task: &SimulationTask, result: &TaskResult) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&JsonlRecord { task, result })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
