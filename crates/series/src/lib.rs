//! Series evaluation (Layer 1)
//!
//! Pi to an arbitrary number of digits via the Chudnovsky series, evaluated
//! by binary splitting over exact integers.

#![warn(missing_docs)]

pub mod chudnovsky;
pub mod error;
pub mod meter;
pub mod sqrt;

pub use chudnovsky::{evaluate, format_decimal, Chudnovsky, EvaluatorConfig};
pub use error::{EvalError, Result};
pub use meter::Progress;

use std::ops::ControlFlow;

/// Progress callback handed to an evaluator for one run.
///
/// Returning `ControlFlow::Break(())` asks the evaluator to stop; it is only
/// consulted at reporting boundaries.
pub type ProgressFn<'a> = dyn FnMut(Progress) -> ControlFlow<()> + 'a;

/// A pi evaluator.
///
/// Implementations are pure CPU work: no I/O and no shared mutable state
/// between calls, so one instance can serve many workers.
pub trait Evaluator: Send + Sync {
    /// Number of progress units a run for `n` digits will report against.
    fn total_iterations(&self, n: u64) -> Result<u64>;

    /// Compute the first `n` digits of pi.
    fn evaluate(&self, n: u64, on_progress: &mut ProgressFn<'_>) -> Result<String>;
}
