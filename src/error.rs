//! Error Types
//!
//! Request-level errors returned synchronously to callers, and the
//! persistence error type shared by every storage backend.
//!
//! Step failures are never represented here: an action that fails is
//! recorded on its [`Step`](crate::plan::Step) and execution carries on.

use thiserror::Error;

use crate::plan::{StepId, StepState};

/// Errors surfaced to callers of the executor and plan API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("execution plan '{0}' is already running")]
    AlreadyRunning(String),

    #[error("execution plan '{0}' is already stopped")]
    AlreadyStopped(String),

    #[error("step {step} not found in execution plan '{plan}'")]
    StepNotFound { plan: String, step: StepId },

    #[error("cannot {operation} step {step} of plan '{plan}' in state {state}")]
    InvalidStepState {
        plan: String,
        step: StepId,
        state: StepState,
        operation: &'static str,
    },

    #[error("progress value {0} is not a finite number")]
    InvalidProgress(f64),

    #[error("invalid flow: {0}")]
    InvalidFlow(String),

    #[error("executor is terminating and accepts no new plans")]
    Terminating,

    #[error("executor is no longer running")]
    ExecutorGone,

    #[error("failed to spawn executor thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker crashed while processing {0}")]
    WorkerCrashed(String),

    #[error("failed to parse plan definition: {0}")]
    Parse(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors raised by [`Persistence`](crate::persistence::Persistence) backends.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("execution plan '{0}' not found")]
    NotFound(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
