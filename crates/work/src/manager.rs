//! Task management service.
//!
//! [`TaskManager`] is the task state machine: it validates submissions,
//! registers tasks on the board, queues them for a bounded pool of workers
//! and applies each run's outcome. Successful runs feed their duration back
//! into the estimator; failed and cancelled runs never do.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use picalc_core::{PrecisionRequest, SampleRecord, Task, TaskFilter, TaskId, TaskSnapshot};
use picalc_progress::{CancelOutcome, DurationEstimator, EstimatorConfig, TaskBoard};
use picalc_series::{Chudnovsky, Evaluator, EvaluatorConfig};
use picalc_storage::JsonStorage;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::executor::{Job, RunOutcome, Worker};
use crate::{Result, TaskError};

/// Task manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Concurrent evaluations
    pub workers: usize,
    /// Submissions buffered ahead of the workers
    pub queue_capacity: usize,
    /// How long finished tasks stay pollable
    pub result_ttl: Duration,
    /// Interval between polls in `wait`
    pub poll_interval: Duration,
    /// Directory for estimator state
    pub state_dir: PathBuf,
    /// Evaluator tuning
    pub evaluator: EvaluatorConfig,
    /// Estimator tuning
    pub estimator: EstimatorConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_capacity: 64,
            result_ttl: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(50),
            state_dir: PathBuf::from(".picalc"),
            evaluator: EvaluatorConfig::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Set the worker count (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the estimator state directory.
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    /// Set how long finished tasks stay pollable.
    pub fn with_result_ttl(mut self, result_ttl: Duration) -> Self {
        self.result_ttl = result_ttl;
        self
    }
}

/// Returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Opaque task id
    pub task_id: String,
    /// Progress units the run will report against
    pub total_iterations: u64,
    /// Predicted wall-clock seconds
    pub estimated_seconds: f64,
}

/// Submit/poll interface used by outer layers.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Queue a computation.
    async fn submit(&self, request: PrecisionRequest) -> Result<SubmitReceipt>;

    /// Latest published snapshot of a task.
    async fn poll(&self, task_id: &str) -> Result<TaskSnapshot>;

    /// Cancel a pending or running task.
    async fn cancel(&self, task_id: &str) -> Result<CancelOutcome>;

    /// Snapshots matching a filter.
    async fn list(&self, filter: TaskFilter) -> Vec<TaskSnapshot>;

    /// Poll until the task is terminal or `timeout` elapses.
    async fn wait(&self, task_id: &str, timeout: Duration) -> Result<Option<TaskSnapshot>>;
}

/// State shared between the manager and its workers.
struct Shared {
    board: Arc<TaskBoard>,
    worker: Worker,
    estimator: Arc<DurationEstimator>,
}

impl Shared {
    async fn process(&self, job: Job) {
        // Cancelled while still queued
        if job.stop.is_requested() {
            debug!("Skipping cancelled task {}", job.task_id);
            return;
        }

        let worker = self.worker.clone();
        let task_id = job.task_id;
        let n = job.n;
        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || worker.run(&job))
            .await
            .unwrap_or_else(|e| RunOutcome::Failed {
                message: join_message(e),
                duration: started.elapsed(),
            });

        self.apply(task_id, n, outcome).await;
    }

    /// The one place a run's outcome becomes a terminal task state.
    async fn apply(&self, task_id: TaskId, n: u64, outcome: RunOutcome) {
        let applied = match outcome {
            RunOutcome::Finished { digits, duration } => {
                let seconds = duration.as_secs_f64();
                // A cancel that lands after the last stop check wins; only a
                // task that actually reached FINISHED becomes a sample.
                let finished = self.board.finish(task_id, digits, seconds);
                if finished.is_ok() {
                    if let Err(e) = self
                        .estimator
                        .record_sample(SampleRecord::new(n, seconds))
                        .await
                    {
                        warn!("Could not record sample for task {}: {}", task_id, e);
                    }
                }
                finished
            }
            RunOutcome::Failed { message, duration } => {
                error!("Task {} failed: {}", task_id, message);
                self.board.fail(task_id, message, duration.as_secs_f64())
            }
            RunOutcome::Cancelled => self.board.mark_cancelled(task_id),
        };

        if let Err(e) = applied {
            warn!("Could not apply outcome for task {}: {}", task_id, e);
        }
    }
}

fn join_message(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "worker was aborted".to_string();
    }
    let panic = err.into_panic();
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("worker panicked: {}", detail)
}

/// In-process task manager with a bounded worker pool.
pub struct TaskManager {
    shared: Arc<Shared>,
    queue: mpsc::Sender<Job>,
    config: ManagerConfig,
}

impl TaskManager {
    /// Start with the Chudnovsky evaluator and estimator state from
    /// `config.state_dir`.
    pub async fn open(config: ManagerConfig) -> Result<Self> {
        let storage = JsonStorage::new(&config.state_dir)
            .await
            .map_err(picalc_progress::EstimatorError::from)?;
        let estimator = DurationEstimator::load(Arc::new(storage), config.estimator.clone()).await?;
        let evaluator = Chudnovsky::with_config(config.evaluator.clone());
        Ok(Self::start(config, Arc::new(evaluator), Arc::new(estimator)))
    }

    /// Start the worker pool. Must be called inside a Tokio runtime.
    pub fn start(
        config: ManagerConfig,
        evaluator: Arc<dyn Evaluator>,
        estimator: Arc<DurationEstimator>,
    ) -> Self {
        let board = Arc::new(TaskBoard::new(config.result_ttl));
        let shared = Arc::new(Shared {
            worker: Worker::new(evaluator, board.clone()),
            board,
            estimator,
        });

        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(dispatch(rx, shared.clone(), config.workers.max(1)));
        info!("Task manager started with {} worker(s)", config.workers.max(1));

        Self {
            shared,
            queue,
            config,
        }
    }

    /// The duration estimator.
    pub fn estimator(&self) -> &Arc<DurationEstimator> {
        &self.shared.estimator
    }

    /// Predicted seconds for `n` digits.
    pub async fn estimate(&self, n: u64) -> f64 {
        self.shared.estimator.predict(n).await
    }

    fn parse_id(task_id: &str) -> Result<TaskId> {
        task_id
            .parse()
            .map_err(|_| TaskError::UnknownTask(task_id.to_string()))
    }
}

async fn dispatch(mut rx: mpsc::Receiver<Job>, shared: Arc<Shared>, workers: usize) {
    let slots = Arc::new(Semaphore::new(workers));
    while let Some(job) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            shared.process(job).await;
            drop(permit);
        });
    }
    debug!("Task queue closed, dispatcher exiting");
}

#[async_trait]
impl TaskService for TaskManager {
    async fn submit(&self, request: PrecisionRequest) -> Result<SubmitReceipt> {
        let n = request
            .digits()
            .ok_or(TaskError::InvalidPrecision { n: request.n })?;
        let total_iterations = self
            .shared
            .worker
            .total_iterations(n)
            .map_err(|_| TaskError::InvalidPrecision { n: request.n })?;

        self.shared.board.purge_expired();

        let task = Task::new(request, total_iterations);
        let task_id = task.id;
        let stop = self.shared.board.register(task);
        let estimated_seconds = self.shared.estimator.predict(n).await;

        let job = Job { task_id, n, stop };
        if self.queue.send(job).await.is_err() {
            let _ = self.shared.board.fail(task_id, "task queue is closed", 0.0);
            return Err(TaskError::QueueClosed);
        }

        info!(
            "Submitted task {} for {} digits ({} iterations, ~{:.2}s)",
            task_id, n, total_iterations, estimated_seconds
        );
        Ok(SubmitReceipt {
            task_id: task_id.to_string(),
            total_iterations,
            estimated_seconds,
        })
    }

    async fn poll(&self, task_id: &str) -> Result<TaskSnapshot> {
        let id = Self::parse_id(task_id)?;
        Ok(self.shared.board.snapshot(id)?)
    }

    async fn cancel(&self, task_id: &str) -> Result<CancelOutcome> {
        let id = Self::parse_id(task_id)?;
        Ok(self.shared.board.cancel(id)?)
    }

    async fn list(&self, filter: TaskFilter) -> Vec<TaskSnapshot> {
        self.shared.board.list(&filter)
    }

    async fn wait(&self, task_id: &str, timeout: Duration) -> Result<Option<TaskSnapshot>> {
        let start = Instant::now();
        loop {
            let snapshot = self.poll(task_id).await?;
            if snapshot.state.is_terminal() {
                return Ok(Some(snapshot));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picalc_core::TaskState;
    use picalc_series::{EvalError, ProgressFn};
    use picalc_core::SampleEntry;
    use std::ops::ControlFlow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PI_50: &str = "31415926535897932384626433832795028841971693993751";

    /// Fails for one digit count, evaluates normally otherwise.
    struct FaultyEvaluator {
        fail_at: u64,
        panic: bool,
    }

    impl Evaluator for FaultyEvaluator {
        fn total_iterations(&self, n: u64) -> picalc_series::Result<u64> {
            Chudnovsky::new().total_iterations(n)
        }

        fn evaluate(
            &self,
            n: u64,
            on_progress: &mut ProgressFn<'_>,
        ) -> picalc_series::Result<String> {
            if n == self.fail_at {
                if self.panic {
                    panic!("limb overflow");
                }
                return Err(EvalError::Arithmetic("division by zero".to_string()));
            }
            Chudnovsky::new().evaluate(n, on_progress)
        }
    }

    /// Reports every unit with a short sleep so tests can observe it running.
    struct SlowEvaluator {
        steps: u64,
        step: Duration,
    }

    impl Evaluator for SlowEvaluator {
        fn total_iterations(&self, n: u64) -> picalc_series::Result<u64> {
            if n == 0 {
                return Err(EvalError::InvalidPrecision { n: 0 });
            }
            Ok(self.steps)
        }

        fn evaluate(
            &self,
            n: u64,
            on_progress: &mut ProgressFn<'_>,
        ) -> picalc_series::Result<String> {
            let started = Instant::now();
            for i in 1..=self.steps {
                std::thread::sleep(self.step);
                let progress = picalc_series::Progress {
                    iteration: i,
                    total: self.steps,
                    elapsed: started.elapsed(),
                };
                if let ControlFlow::Break(()) = on_progress(progress) {
                    return Err(EvalError::Cancelled);
                }
            }
            Ok(PI_50[..n as usize].to_string())
        }
    }

    /// Never reports progress, so its task stays PENDING until it returns.
    struct SilentEvaluator {
        delay: Duration,
        started: Arc<AtomicUsize>,
    }

    impl Evaluator for SilentEvaluator {
        fn total_iterations(&self, n: u64) -> picalc_series::Result<u64> {
            Chudnovsky::new().total_iterations(n)
        }

        fn evaluate(&self, n: u64, _: &mut ProgressFn<'_>) -> picalc_series::Result<String> {
            self.started.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(PI_50[..n as usize].to_string())
        }
    }

    async fn create_manager(
        dir: &std::path::Path,
        workers: usize,
        evaluator: Arc<dyn Evaluator>,
    ) -> TaskManager {
        let storage = Arc::new(JsonStorage::new(dir).await.unwrap());
        let estimator = DurationEstimator::load(storage, EstimatorConfig::default())
            .await
            .unwrap();
        let config = ManagerConfig {
            workers,
            poll_interval: Duration::from_millis(5),
            state_dir: dir.to_path_buf(),
            ..Default::default()
        };
        TaskManager::start(config, evaluator, Arc::new(estimator))
    }

    async fn wait_for(manager: &TaskManager, id: &str) -> TaskSnapshot {
        manager
            .wait(id, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("task did not finish in time")
    }

    /// Samples land just after the FINISHED transition.
    async fn wait_for_samples(manager: &TaskManager, count: u64) -> Vec<SampleEntry> {
        for _ in 0..3000 {
            let samples = manager.estimator().samples().await;
            if samples.iter().map(|s| s.count).sum::<u64>() >= count {
                return samples;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        manager.estimator().samples().await
    }

    #[tokio::test]
    async fn test_submit_ten_digits_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = create_manager(dir.path(), 2, Arc::new(Chudnovsky::new())).await;

        let receipt = manager.submit(PrecisionRequest::new(10)).await.unwrap();
        assert_eq!(receipt.total_iterations, 6);
        assert!(receipt.estimated_seconds > 0.0);
        assert_eq!(manager.estimate(10).await, receipt.estimated_seconds);

        let snapshot = wait_for(&manager, &receipt.task_id).await;
        assert_eq!(snapshot.state, TaskState::Finished);
        assert_eq!(snapshot.result.as_deref(), Some("3141592653"));
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(snapshot.iteration, snapshot.total_iterations);
        assert!(snapshot.elapsed_time > 0.0);
        assert!(snapshot.error.is_none());

        let samples = wait_for_samples(&manager, 1).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].n, 10);
    }

    #[tokio::test]
    async fn test_invalid_precision_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = create_manager(dir.path(), 1, Arc::new(Chudnovsky::new())).await;

        for n in [0, -1] {
            let err = manager.submit(PrecisionRequest::new(n)).await.unwrap_err();
            assert!(matches!(err, TaskError::InvalidPrecision { n: rejected } if rejected == n));
        }

        let everything = TaskFilter {
            include_terminal: true,
            ..Default::default()
        };
        assert!(manager.list(everything).await.is_empty());
    }

    #[tokio::test]
    async fn test_poll_unknown_task() {
        let dir = tempfile::tempdir().unwrap();
        let manager = create_manager(dir.path(), 1, Arc::new(Chudnovsky::new())).await;

        let never_submitted = TaskId::new().to_string();
        assert!(matches!(
            manager.poll(&never_submitted).await,
            Err(TaskError::UnknownTask(id)) if id == never_submitted
        ));
        assert!(matches!(
            manager.poll("definitely-not-an-id").await,
            Err(TaskError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_not_sampled() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(FaultyEvaluator {
            fail_at: 13,
            panic: false,
        });
        let manager = create_manager(dir.path(), 2, evaluator).await;

        let bad = manager.submit(PrecisionRequest::new(13)).await.unwrap();
        let good = manager.submit(PrecisionRequest::new(50)).await.unwrap();

        let failed = wait_for(&manager, &bad.task_id).await;
        assert_eq!(failed.state, TaskState::Failure);
        assert!(failed.result.is_none());
        assert!(failed.error.unwrap().contains("division by zero"));

        let finished = wait_for(&manager, &good.task_id).await;
        assert_eq!(finished.state, TaskState::Finished);
        assert_eq!(finished.result.as_deref(), Some(PI_50));

        let samples = wait_for_samples(&manager, 1).await;
        assert!(samples.iter().all(|s| s.n != 13));
        assert_eq!(samples.len(), 1);

        // Still accepting work
        let again = manager.submit(PrecisionRequest::new(20)).await.unwrap();
        assert_eq!(wait_for(&manager, &again.task_id).await.state, TaskState::Finished);
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_failure() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(FaultyEvaluator {
            fail_at: 7,
            panic: true,
        });
        let manager = create_manager(dir.path(), 1, evaluator).await;

        let receipt = manager.submit(PrecisionRequest::new(7)).await.unwrap();
        let snapshot = wait_for(&manager, &receipt.task_id).await;
        assert_eq!(snapshot.state, TaskState::Failure);
        assert!(snapshot.error.unwrap().contains("limb overflow"));
        assert!(manager.estimator().samples().await.is_empty());
    }

    #[tokio::test]
    async fn test_polled_progress_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(SlowEvaluator {
            steps: 40,
            step: Duration::from_millis(2),
        });
        let manager = create_manager(dir.path(), 1, evaluator).await;
        let receipt = manager.submit(PrecisionRequest::new(10)).await.unwrap();

        let mut seen = Vec::new();
        let last = loop {
            let snapshot = manager.poll(&receipt.task_id).await.unwrap();
            if snapshot.state.is_terminal() {
                break snapshot;
            }
            seen.push((snapshot.progress, snapshot.elapsed_time));
            tokio::time::sleep(Duration::from_millis(1)).await;
        };

        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));
        assert_eq!(last.state, TaskState::Finished);
        assert_eq!(last.progress, 1.0);
        assert_eq!(last.result.as_deref(), Some("3141592653"));
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(SlowEvaluator {
            steps: 10_000,
            step: Duration::from_millis(1),
        });
        let manager = create_manager(dir.path(), 1, evaluator).await;
        let receipt = manager.submit(PrecisionRequest::new(10)).await.unwrap();

        loop {
            let snapshot = manager.poll(&receipt.task_id).await.unwrap();
            if snapshot.state == TaskState::Progress {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(
            manager.cancel(&receipt.task_id).await.unwrap(),
            CancelOutcome::Requested
        );
        let snapshot = wait_for(&manager, &receipt.task_id).await;
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert!(snapshot.result.is_none());
        assert!(snapshot.progress < 1.0);
        assert!(manager.estimator().samples().await.is_empty());

        assert!(matches!(
            manager.cancel(&receipt.task_id).await,
            Err(TaskError::NotCancellable { state: TaskState::Cancelled, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_queued_task_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(SlowEvaluator {
            steps: 50,
            step: Duration::from_millis(2),
        });
        let manager = create_manager(dir.path(), 1, evaluator).await;

        let first = manager.submit(PrecisionRequest::new(10)).await.unwrap();
        let second = manager.submit(PrecisionRequest::new(10)).await.unwrap();
        assert_eq!(
            manager.cancel(&second.task_id).await.unwrap(),
            CancelOutcome::Cancelled
        );

        assert_eq!(wait_for(&manager, &first.task_id).await.state, TaskState::Finished);
        // Give the single worker time to pick up (and skip) the second job
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = manager.poll(&second.task_id).await.unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert_eq!(snapshot.iteration, 0);
        assert_eq!(wait_for_samples(&manager, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_all_complete() {
        let dir = tempfile::tempdir().unwrap();
        let manager = create_manager(dir.path(), 4, Arc::new(Chudnovsky::new())).await;

        let mut receipts = Vec::new();
        for n in [5i64, 15, 25, 35, 45, 50] {
            receipts.push((n, manager.submit(PrecisionRequest::new(n)).await.unwrap()));
        }

        for (n, receipt) in &receipts {
            let snapshot = wait_for(&manager, &receipt.task_id).await;
            assert_eq!(snapshot.state, TaskState::Finished);
            assert_eq!(snapshot.result.as_deref(), Some(&PI_50[..*n as usize]));
        }

        let samples = wait_for_samples(&manager, 6).await;
        assert_eq!(samples.len(), 6);
        assert!(manager.estimator().params().await.is_some());
    }

    #[tokio::test]
    async fn test_expired_results_become_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(JsonStorage::new(dir.path()).await.unwrap());
        let estimator = DurationEstimator::load(storage, EstimatorConfig::default())
            .await
            .unwrap();
        let config = ManagerConfig::default()
            .with_workers(1)
            .with_result_ttl(Duration::ZERO);
        let manager = TaskManager::start(config, Arc::new(Chudnovsky::new()), Arc::new(estimator));

        let receipt = manager.submit(PrecisionRequest::new(10)).await.unwrap();
        let mut expired = false;
        for _ in 0..5000 {
            if let Err(TaskError::UnknownTask(_)) = manager.poll(&receipt.task_id).await {
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(expired);
    }

    #[tokio::test]
    async fn test_cancel_after_worker_started_records_no_sample() {
        let dir = tempfile::tempdir().unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let evaluator = Arc::new(SilentEvaluator {
            delay: Duration::from_millis(200),
            started: started.clone(),
        });
        let manager = create_manager(dir.path(), 1, evaluator).await;

        let doomed = manager.submit(PrecisionRequest::new(10)).await.unwrap();
        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Still PENDING: the worker is past its stop check but has not reported
        assert_eq!(
            manager.cancel(&doomed.task_id).await.unwrap(),
            CancelOutcome::Cancelled
        );

        // One worker, so this runs only after the first outcome was applied
        let next = manager.submit(PrecisionRequest::new(20)).await.unwrap();
        assert_eq!(wait_for(&manager, &next.task_id).await.state, TaskState::Finished);

        let snapshot = manager.poll(&doomed.task_id).await.unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert!(snapshot.result.is_none());

        let samples = wait_for_samples(&manager, 1).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].n, 20);
    }
}
