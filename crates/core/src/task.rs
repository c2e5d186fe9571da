//! Task model - one pi computation from submission to a terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::id::TaskId;
use crate::request::PrecisionRequest;
use crate::{ModelError, Time};

/// Lifecycle state of a task.
///
/// States only ever move forward: `Pending -> Progress -> {Finished, Failure, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created and queued, not yet picked up by a worker
    Pending,
    /// A worker is evaluating the series
    Progress,
    /// Completed with a result
    Finished,
    /// Evaluation failed
    Failure,
    /// Cancelled before completion
    Cancelled,
}

impl TaskState {
    fn rank(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Progress => 1,
            TaskState::Finished | TaskState::Failure | TaskState::Cancelled => 2,
        }
    }

    /// Whether the task can no longer change.
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Whether moving to `next` is a forward transition.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        next.rank() > self.rank()
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Progress => "PROGRESS",
            TaskState::Finished => "FINISHED",
            TaskState::Failure => "FAILURE",
            TaskState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pi computation owned by exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// What was asked for
    pub request: PrecisionRequest,

    /// Current state
    pub state: TaskState,

    /// Split-tree nodes completed so far
    pub iteration: u64,

    /// Split-tree nodes in total, fixed at creation
    pub total_iterations: u64,

    /// Seconds spent evaluating, non-decreasing
    pub elapsed_time: f64,

    /// Estimated seconds remaining, from the observed rate
    pub eta: f64,

    /// Seconds between the last two progress publications
    pub last_step_time: f64,

    /// Digits of pi, set only when finished
    pub result: Option<String>,

    /// Failure message, set only on failure
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: Time,

    /// When a worker picked the task up
    pub started_at: Option<Time>,

    /// When the task reached a terminal state
    pub completed_at: Option<Time>,
}

impl Task {
    /// Create a pending task.
    pub fn new(request: PrecisionRequest, total_iterations: u64) -> Self {
        Self {
            id: TaskId::new(),
            request,
            state: TaskState::Pending,
            iteration: 0,
            total_iterations,
            elapsed_time: 0.0,
            eta: 0.0,
            last_step_time: 0.0,
            result: None,
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Fraction of the split tree completed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_iterations == 0 {
            return 0.0;
        }
        (self.iteration as f64 / self.total_iterations as f64).clamp(0.0, 1.0)
    }

    fn transition(&mut self, next: TaskState) -> Result<(), ModelError> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record a progress report.
    ///
    /// The first report moves the task from `Pending` to `Progress`. Reports
    /// never move `iteration` or `elapsed_time` backwards.
    pub fn record_progress(&mut self, iteration: u64, elapsed: f64) -> Result<(), ModelError> {
        match self.state {
            TaskState::Pending => {
                self.transition(TaskState::Progress)?;
                self.started_at = Some(chrono::Utc::now());
            }
            TaskState::Progress => {}
            state => {
                return Err(ModelError::InvalidTransition {
                    from: state,
                    to: TaskState::Progress,
                })
            }
        }

        let elapsed = elapsed.max(self.elapsed_time);
        self.last_step_time = elapsed - self.elapsed_time;
        self.elapsed_time = elapsed;
        self.iteration = iteration.clamp(self.iteration, self.total_iterations);

        let progress = self.progress();
        self.eta = if progress > 0.0 && progress < 1.0 {
            self.elapsed_time / progress - self.elapsed_time
        } else {
            0.0
        };
        Ok(())
    }

    /// Move to `Finished` with the computed digits.
    pub fn finish(&mut self, result: String, elapsed: f64) -> Result<(), ModelError> {
        self.transition(TaskState::Finished)?;
        self.iteration = self.total_iterations;
        self.elapsed_time = elapsed.max(self.elapsed_time);
        self.eta = 0.0;
        self.result = Some(result);
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Move to `Failure` with a captured message.
    pub fn fail(&mut self, message: impl Into<String>, elapsed: f64) -> Result<(), ModelError> {
        self.transition(TaskState::Failure)?;
        self.elapsed_time = elapsed.max(self.elapsed_time);
        self.eta = 0.0;
        self.error = Some(message.into());
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Move to `Cancelled`.
    pub fn cancel(&mut self) -> Result<(), ModelError> {
        self.transition(TaskState::Cancelled)?;
        self.eta = 0.0;
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Take a snapshot for observers.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.to_string(),
            state: self.state,
            progress: self.progress(),
            iteration: self.iteration,
            total_iterations: self.total_iterations,
            elapsed_time: self.elapsed_time,
            eta: self.eta,
            last_step_time: self.last_step_time,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// What a poller sees of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task ID
    pub task_id: String,
    /// Task state
    pub state: TaskState,
    /// Completed fraction (0.0 - 1.0)
    pub progress: f64,
    /// Split-tree nodes completed
    pub iteration: u64,
    /// Split-tree nodes in total
    pub total_iterations: u64,
    /// Seconds spent evaluating
    pub elapsed_time: f64,
    /// Estimated seconds remaining
    pub eta: f64,
    /// Seconds between the last two progress publications
    pub last_step_time: f64,
    /// Digits of pi (if finished)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Only tasks in this state
    pub state: Option<TaskState>,

    /// Include finished, failed and cancelled tasks
    pub include_terminal: bool,

    /// Maximum results to return
    pub limit: Option<usize>,
}

impl TaskFilter {
    /// Whether `task` passes the filter.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(state) = self.state {
            if task.state != state {
                return false;
            }
        }
        self.include_terminal || !task.state.is_terminal()
    }
}
