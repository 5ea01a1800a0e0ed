//! alpha_forge: quota-aware simulation execution for alpha research.
//!
//! This library provides a rate-limit aware HTTP client for the simulation
//! platform and a self-healing worker pool that drives simulations from
//! submission to completion.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use client::{ClientConfig, PlatformClient, QuotaAwareClient};
pub use config::{AppConfig, ConfigError};
pub use error::{ClientError, ErrorClass, SchedulerError, SinkError, WorkerError};
pub use scheduler::{
    PoolError, PoolStatus, Scheduler, SimulationTask, TaskResult, WorkerPool, WorkerPoolConfig,
};
