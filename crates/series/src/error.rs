//! Evaluator errors.

/// Result type for evaluation.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur while evaluating the series.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// Requested digit count is not positive
    #[error("invalid precision: {n}, expected a positive number of digits")]
    InvalidPrecision {
        /// The rejected digit count
        n: i64,
    },

    /// The progress callback asked to stop
    #[error("evaluation cancelled")]
    Cancelled,

    /// Internal arithmetic fault
    #[error("arithmetic failure: {0}")]
    Arithmetic(String),
}
