//! Published task state.
//!
//! The board holds the latest snapshot of every live task. The owning worker
//! is the only writer for a task; pollers read under a shared lock and never
//! see a partially applied update.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use picalc_core::{ModelError, Task, TaskFilter, TaskId, TaskSnapshot, TaskState};
use tracing::{debug, info};

use crate::cancel::StopFlag;

/// Errors from the task board.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    /// Never created, or already expired
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// Cancel on a task that already ended
    #[error("task {id} cannot be cancelled in {state} state")]
    NotCancellable {
        /// Task
        id: TaskId,
        /// Its terminal state
        state: TaskState,
    },

    /// Illegal state change
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Result type for board operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// What a cancel request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task had not started and is now cancelled
    Cancelled,
    /// The task is running; its worker will stop at the next report
    Requested,
}

struct Entry {
    task: Task,
    stop: Arc<StopFlag>,
}

/// Latest published state of every task.
pub struct TaskBoard {
    tasks: RwLock<HashMap<TaskId, Entry>>,
    result_ttl: Duration,
}

impl TaskBoard {
    /// Create a board that forgets terminal tasks `result_ttl` after they end.
    pub fn new(result_ttl: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            result_ttl,
        }
    }

    fn is_expired(&self, task: &Task) -> bool {
        match task.completed_at {
            Some(done) if task.state.is_terminal() => {
                let age = (chrono::Utc::now() - done).to_std().unwrap_or_default();
                age > self.result_ttl
            }
            _ => false,
        }
    }

    /// Add a new task; returns its stop flag.
    pub fn register(&self, task: Task) -> Arc<StopFlag> {
        let stop = Arc::new(StopFlag::new());
        debug!("Registered task {} ({} iterations)", task.id, task.total_iterations);
        self.tasks.write().insert(
            task.id,
            Entry {
                task,
                stop: stop.clone(),
            },
        );
        stop
    }

    /// Latest snapshot of a task.
    pub fn snapshot(&self, id: TaskId) -> Result<TaskSnapshot> {
        self.with_task(id, |task| task.snapshot())
    }

    fn with_task<T>(&self, id: TaskId, f: impl FnOnce(&Task) -> T) -> Result<T> {
        let tasks = self.tasks.read();
        match tasks.get(&id) {
            Some(entry) if !self.is_expired(&entry.task) => Ok(f(&entry.task)),
            _ => Err(TrackerError::UnknownTask(id)),
        }
    }

    fn update<T>(&self, id: TaskId, f: impl FnOnce(&mut Entry) -> Result<T>) -> Result<T> {
        let mut tasks = self.tasks.write();
        let entry = tasks.get_mut(&id).ok_or(TrackerError::UnknownTask(id))?;
        f(entry)
    }

    /// Publish a progress report from the owning worker.
    pub fn publish_progress(&self, id: TaskId, iteration: u64, elapsed: f64) -> Result<()> {
        self.update(id, |entry| {
            entry.task.record_progress(iteration, elapsed)?;
            let task = &entry.task;
            debug!(
                "Task {} at {}/{} ({:.2}s, eta {:.2}s)",
                id, task.iteration, task.total_iterations, task.elapsed_time, task.eta
            );
            Ok(())
        })
    }

    /// Mark a task finished with its digits.
    pub fn finish(&self, id: TaskId, result: String, elapsed: f64) -> Result<()> {
        self.update(id, |entry| {
            entry.task.finish(result, elapsed)?;
            info!("Task {} finished in {:.3}s", id, entry.task.elapsed_time);
            Ok(())
        })
    }

    /// Mark a task failed.
    pub fn fail(&self, id: TaskId, message: impl Into<String>, elapsed: f64) -> Result<()> {
        self.update(id, |entry| {
            entry.task.fail(message, elapsed)?;
            info!("Task {} failed: {}", id, entry.task.error.as_deref().unwrap_or_default());
            Ok(())
        })
    }

    /// Record that a worker honoured a stop request.
    pub fn mark_cancelled(&self, id: TaskId) -> Result<()> {
        self.update(id, |entry| {
            entry.task.cancel()?;
            info!("Task {} cancelled", id);
            Ok(())
        })
    }

    /// Cancel a task.
    ///
    /// Pending tasks are cancelled immediately. Running tasks get their stop
    /// flag raised and are cancelled by their worker at the next report.
    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome> {
        let mut tasks = self.tasks.write();
        let entry = match tasks.get_mut(&id) {
            Some(entry) if !self.is_expired(&entry.task) => entry,
            _ => return Err(TrackerError::UnknownTask(id)),
        };

        if entry.task.state.is_terminal() {
            return Err(TrackerError::NotCancellable {
                id,
                state: entry.task.state,
            });
        }

        entry.stop.request();
        match entry.task.state {
            TaskState::Pending => {
                entry.task.cancel()?;
                info!("Task {} cancelled before start", id);
                Ok(CancelOutcome::Cancelled)
            }
            _ => {
                info!("Stop requested for task {}", id);
                Ok(CancelOutcome::Requested)
            }
        }
    }

    /// Snapshots matching a filter, oldest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.read();
        let mut matching: Vec<&Task> = tasks
            .values()
            .map(|entry| &entry.task)
            .filter(|task| !self.is_expired(task) && filter.matches(task))
            .collect();
        matching.sort_by_key(|task| task.id);

        let limit = filter.limit.unwrap_or(usize::MAX);
        matching.into_iter().take(limit).map(Task::snapshot).collect()
    }

    /// Drop expired terminal tasks. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, entry| !self.is_expired(&entry.task));
        let purged = before - tasks.len();
        if purged > 0 {
            debug!("Purged {} expired task(s)", purged);
        }
        purged
    }

    /// Number of tasks held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Whether the board holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
