//! Errors surfaced to callers of the task service.

use picalc_core::{ModelError, TaskState};
use picalc_progress::{EstimatorError, TrackerError};

/// Result type for task service operations.
pub type Result<T> = std::result::Result<T, TaskError>;

/// Errors returned by the task service.
///
/// Evaluation faults are not here: they end up in the task's `FAILURE`
/// state and never fail the call that observes them.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Digit count is not a positive integer
    #[error("invalid precision: {n}, expected a positive integer")]
    InvalidPrecision {
        /// Rejected digit count
        n: i64,
    },

    /// Task id never created or expired
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Algorithm not supported
    #[error("only the Chudnovsky algorithm is supported, got: {0}")]
    UnsupportedAlgorithm(String),

    /// Cancel on a finished, failed or cancelled task
    #[error("task {id} cannot be cancelled in {state} state")]
    NotCancellable {
        /// Task id
        id: String,
        /// Current state
        state: TaskState,
    },

    /// Illegal state change
    #[error("invalid task transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: TaskState,
        /// Requested state
        to: TaskState,
    },

    /// The worker pool has shut down
    #[error("task queue is closed")]
    QueueClosed,

    /// Estimator could not be loaded
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
}

impl From<ModelError> for TaskError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidTransition { from, to } => TaskError::InvalidTransition { from, to },
            ModelError::UnsupportedAlgorithm(name) => TaskError::UnsupportedAlgorithm(name),
        }
    }
}

impl From<TrackerError> for TaskError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::UnknownTask(id) => TaskError::UnknownTask(id.to_string()),
            TrackerError::NotCancellable { id, state } => TaskError::NotCancellable {
                id: id.to_string(),
                state,
            },
            TrackerError::Model(model) => model.into(),
        }
    }
}
