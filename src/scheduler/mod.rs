//! Simulation execution with a pool of quota-aware workers.
//!
//! This module provides the execution core:
//!
//! - **Scheduler**: source of ready tasks (selection policy lives behind it)
//! - **SimulationWorker**: submit, poll and report one task at a time
//! - **WorkerPool**: owns the workers, scales them and restarts stalled ones
//! - **ResultSink**: durable destination for task outcomes
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  Scheduler   │
//!                      └──────┬───────┘
//!                             │ schedule(batch)
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         │  submit / poll    │                   │
//!         └───────────────────┼───────────────────┘
//!                             ▼
//!                   ┌───────────────────┐
//!                   │ QuotaAwareClient  │
//!                   └───────────────────┘
//!
//!    completions ──▶ WorkerPool (stats, health) ──▶ ResultSink
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use alpha_forge::client::ClientConfig;
//! use alpha_forge::scheduler::{
//!     InMemoryScheduler, SimulationWorkerFactory, WorkerConfig, WorkerPool, WorkerPoolConfig,
//! };
//! use std::sync::Arc;
//!
//! let scheduler = Arc::new(InMemoryScheduler::with_tasks(tasks)?);
//! let factory = SimulationWorkerFactory::from_client_config(
//!     scheduler,
//!     ClientConfig::default().with_credentials("user", "secret"),
//!     WorkerConfig::default(),
//! );
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(4), Arc::new(factory));
//! pool.start().await;
//! pool.scale_up(2).await;
//!
//! // Graceful shutdown
//! pool.stop().await?;
//! ```
//!
//! # Reliability
//!
//! - **Retries**: transient HTTP failures are retried with exponential backoff
//! - **Quota windows**: requests wait for the platform's rate-limit reset
//! - **Health check**: workers with no heartbeat within the timeout are replaced
//! - **Graceful shutdown**: workers finish their current task before stopping

pub mod queue;
pub mod sink;
pub mod stats;
pub mod task;
pub mod worker;
pub mod worker_pool;

pub use queue::{InMemoryScheduler, Scheduler};
pub use sink::{InMemoryResultSink, JsonlResultSink, ResultSink};
pub use stats::{DurationWindow, PoolStatistics, PoolStatus};
pub use task::{ResultStatus, SimulationTask, TaskResult, TaskStatus};
pub use worker::{
    ClientFactory, SimulationWorker, SimulationWorkerFactory, TaskListener, Worker, WorkerConfig,
    WorkerFactory,
};
pub use worker_pool::{PoolError, WorkerPool, WorkerPoolConfig};
