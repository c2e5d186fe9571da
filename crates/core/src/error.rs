//! Model-level errors.

use crate::TaskState;

/// Errors raised by the data model itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A state change that would move a task backwards or out of a terminal state.
    #[error("invalid task transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: TaskState,
        /// Requested state
        to: TaskState,
    },

    /// Algorithm name not recognised.
    #[error("only the Chudnovsky algorithm is supported, got: {0}")]
    UnsupportedAlgorithm(String),
}
