//! Task execution.
//!
//! A [`Worker`] runs one evaluation synchronously on the current thread,
//! publishing progress to the board through a callback bound to the task id.
//! It never changes a task's terminal state itself; it returns a
//! [`RunOutcome`] for the manager to apply.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use picalc_core::TaskId;
use picalc_progress::{StopFlag, TaskBoard};
use picalc_series::{EvalError, Evaluator, Progress};
use tracing::{debug, warn};

/// A unit of work pulled from the queue.
#[derive(Debug, Clone)]
pub struct Job {
    /// Task being computed
    pub task_id: TaskId,
    /// Digits requested
    pub n: u64,
    /// Raised when the task should stop
    pub stop: Arc<StopFlag>,
}

/// How an evaluation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Digits computed
    Finished {
        /// Digits of pi
        digits: String,
        /// Wall-clock time of the evaluation
        duration: Duration,
    },
    /// The evaluator faulted
    Failed {
        /// Captured message
        message: String,
        /// Time spent before the fault
        duration: Duration,
    },
    /// Stopped at a report boundary
    Cancelled,
}

/// Runs evaluations for the manager.
#[derive(Clone)]
pub struct Worker {
    evaluator: Arc<dyn Evaluator>,
    board: Arc<TaskBoard>,
}

impl Worker {
    /// Create a worker.
    pub fn new(evaluator: Arc<dyn Evaluator>, board: Arc<TaskBoard>) -> Self {
        Self { evaluator, board }
    }

    /// Progress units a run for `n` digits reports against.
    pub fn total_iterations(&self, n: u64) -> picalc_series::Result<u64> {
        self.evaluator.total_iterations(n)
    }

    /// Evaluate a job to completion. CPU-bound: call from a blocking thread.
    pub fn run(&self, job: &Job) -> RunOutcome {
        let started = Instant::now();
        let board = &self.board;

        let mut on_progress = |progress: Progress| {
            if job.stop.is_requested() {
                return ControlFlow::Break(());
            }
            let elapsed = progress.elapsed.as_secs_f64();
            if let Err(e) = board.publish_progress(job.task_id, progress.iteration, elapsed) {
                warn!("Dropping progress for task {}: {}", job.task_id, e);
            }
            ControlFlow::Continue(())
        };

        let result = self.evaluator.evaluate(job.n, &mut on_progress);
        let duration = started.elapsed();

        match result {
            Ok(digits) => {
                debug!("Task {} evaluated {} digits", job.task_id, digits.len());
                RunOutcome::Finished { digits, duration }
            }
            Err(EvalError::Cancelled) => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed {
                message: e.to_string(),
                duration,
            },
        }
    }
}
