//! Error types for alpha-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Quota-aware HTTP requests against the simulation platform
//! - Worker execution of simulation tasks
//! - Scheduler and result sink collaborators
//!
//! Every error can be mapped onto an [`ErrorClass`], which decides whether the
//! failure is retried, waited out, or surfaced immediately.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of failures used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connection failures and retryable statuses (429, 5xx).
    /// Retried with exponential backoff.
    Transient,
    /// A local rate-limit window is exhausted. Resolved by waiting.
    QuotaExceeded,
    /// A task exceeded its wall-clock budget. Fails the task, not the worker.
    TaskTimeout,
    /// Configuration, decoding and non-retryable status failures.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::QuotaExceeded => write!(f, "quota_exceeded"),
            ErrorClass::TaskTimeout => write!(f, "task_timeout"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Errors returned by the quota-aware client and the platform API on top of it.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client is closed or was never authenticated")]
    Closed,

    #[error("No credentials configured for authentication")]
    MissingCredentials,

    #[error("Request is missing an api_name for rate-limit tracking")]
    MissingApiName,

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// Returns the error class of this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Timeout(_) | ClientError::Network(_) => ErrorClass::Transient,
            ClientError::HttpStatus { status, .. } if *status == 429 || *status >= 500 => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// Returns the HTTP status code if this is a status error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            ClientError::Network(err.to_string())
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if err.is_builder() {
            ClientError::InvalidRequest(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

/// Errors raised while a worker executes a simulation task.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Task {task_id} exceeded its {timeout:?} wall-clock budget")]
    TaskTimeout { task_id: u64, timeout: Duration },

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Worker creation failed: {0}")]
    Creation(String),

    #[error("Worker introspection failed: {0}")]
    Introspection(String),
}

impl WorkerError {
    /// Returns the error class of this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkerError::Client(e) => e.class(),
            WorkerError::TaskTimeout { .. } => ErrorClass::TaskTimeout,
            WorkerError::Scheduler(_) => ErrorClass::Transient,
            WorkerError::Creation(_) | WorkerError::Introspection(_) => ErrorClass::Fatal,
        }
    }
}

/// Errors reported by a [`crate::scheduler::Scheduler`] implementation.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),

    #[error("Task {id} cannot be scheduled from status {status}")]
    NotSchedulable { id: u64, status: String },
}

/// Errors reported by a [`crate::scheduler::ResultSink`] implementation.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
