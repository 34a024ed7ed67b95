//! Bounded worker pool: one dispatcher feeding N workers through a
//! backpressured channel.
//!
//! The dispatcher pulls jobs from a `JobSource` and sends them into a
//! bounded channel sized at `concurrency x backlog_multiplier`; when the
//! backlog is full the send blocks, which pauses the source. Workers
//! share the receiving end and run the task action on each job,
//! retrying in place on `TaskOutcome::Retry` with an escalating backoff.
//!
//! Shutdown paths:
//! - cancellation (`stop` or the parent token): workers finish the job
//!   in hand and stop pulling; the dispatcher stops feeding
//! - source exhaustion (`next_job` error): the dispatcher drops the
//!   sender, workers drain the backlog and exit

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retry::{RetryPolicy, TaskOutcome};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The job source failed; dispatch cannot continue.
    #[error("Job source failed: {0}")]
    Source(String),

    /// A task attempt failed unexpectedly. Terminal for that job.
    #[error("Task failed: {0}")]
    Task(String),
}

/// One pull from a job source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch<J> {
    /// A job to dispatch.
    Job(J),
    /// Nothing right now; the dispatcher sleeps and asks again. Not an
    /// end-of-stream marker.
    NoWork,
}

/// Produces the jobs a pool works through.
///
/// `NoWork` signals a momentarily empty source; an `Err` is fatal and
/// stops dispatch for good.
#[async_trait]
pub trait JobSource: Send {
    type Job: Send + 'static;

    /// Pulls the next job, or `NoWork` if none is available yet.
    async fn next_job(&mut self) -> Result<Fetch<Self::Job>, PoolError>;
}

/// The work performed on each job.
#[async_trait]
pub trait TaskAction: Send + Sync {
    type Job: Send + Sync + 'static;

    /// Runs one attempt on `job`.
    ///
    /// `Err` is treated like `TaskOutcome::Failure`: logged and terminal
    /// for the job, never for the pool.
    async fn run(&self, job: &Self::Job) -> Result<TaskOutcome, PoolError>;
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks.
    pub concurrency: usize,
    /// Backlog capacity as a multiple of `concurrency`.
    pub backlog_multiplier: usize,
    /// How long the dispatcher sleeps after the source reports no work.
    pub no_work_delay: Duration,
    /// Backoff schedule for `TaskOutcome::Retry`.
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            backlog_multiplier: 2,
            no_work_delay: Duration::from_secs(7),
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Creates a configuration with the specified worker count.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Sets the backlog multiplier.
    pub fn with_backlog_multiplier(mut self, multiplier: usize) -> Self {
        self.backlog_multiplier = multiplier;
        self
    }

    /// Sets the no-work sleep.
    pub fn with_no_work_delay(mut self, delay: Duration) -> Self {
        self.no_work_delay = delay;
        self
    }

    /// Sets the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bounded channel capacity.
    fn backlog(&self) -> usize {
        (self.concurrency * self.backlog_multiplier).max(1)
    }
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers.
    pub concurrency: usize,
    /// Workers currently running a task.
    pub active_workers: usize,
    /// Jobs finished with `TaskOutcome::Ok`.
    pub jobs_succeeded: u64,
    /// Jobs finished with `TaskOutcome::Failure` or an error.
    pub jobs_failed: u64,
    /// Retry attempts scheduled across all jobs.
    pub retries: u64,
    /// Average wall time per finished job.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Total jobs finished, successfully or not.
    pub fn total_finished(&self) -> u64 {
        self.jobs_succeeded + self.jobs_failed
    }
}

/// Shared counters behind the snapshots.
struct SharedPoolStats {
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    retries: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_success(&self, duration: Duration) {
        self.jobs_succeeded.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn snapshot(&self, concurrency: usize) -> PoolStats {
        let succeeded = self.jobs_succeeded.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let finished = succeeded + failed;
        let average_job_duration = if finished > 0 {
            Duration::from_millis(total_duration_ms / finished)
        } else {
            Duration::ZERO
        };

        PoolStats {
            concurrency,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_succeeded: succeeded,
            jobs_failed: failed,
            retries: self.retries.load(Ordering::SeqCst),
            average_job_duration,
        }
    }
}

/// A running pool: dispatcher plus workers, already spawned.
pub struct WorkerPool {
    config: PoolConfig,
    stats: Arc<SharedPoolStats>,
    shutdown: CancellationToken,
    dispatcher: JoinHandle<Result<(), PoolError>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the dispatcher and workers and starts processing.
    ///
    /// The pool's own token is a child of `parent`: cancelling the parent
    /// stops the pool, while `stop` leaves the parent untouched.
    pub fn start<S, T>(config: PoolConfig, source: S, action: T, parent: &CancellationToken) -> Self
    where
        S: JobSource + 'static,
        T: TaskAction<Job = S::Job> + 'static,
        S::Job: Sync,
    {
        let shutdown = parent.child_token();
        let stats = Arc::new(SharedPoolStats::new());
        let (tx, rx) = mpsc::channel(config.backlog());
        let rx = Arc::new(Mutex::new(rx));
        let action = Arc::new(action);

        let mut workers = Vec::with_capacity(config.concurrency);
        for id in 0..config.concurrency {
            let worker = Worker {
                id,
                queue: Arc::clone(&rx),
                action: Arc::clone(&action),
                retry: config.retry.clone(),
                shutdown: shutdown.clone(),
                stats: Arc::clone(&stats),
            };
            workers.push(tokio::spawn(worker.run()));
        }

        let dispatcher = tokio::spawn(dispatch(
            source,
            tx,
            config.no_work_delay,
            shutdown.clone(),
        ));

        info!(concurrency = config.concurrency, backlog = config.backlog(), "Worker pool started");
        Self {
            config,
            stats,
            shutdown,
            dispatcher,
            workers,
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot(self.config.concurrency)
    }

    /// Requests a graceful stop: no new jobs are dispatched or pulled,
    /// jobs already in a worker's hands finish.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the pool to finish, which happens on `stop`, parent
    /// cancellation, or a fatal source error (returned here).
    pub async fn wait_for_completion(self) -> Result<(), PoolError> {
        self.wait_for_completion_with(|_| {}).await
    }

    /// Like [`wait_for_completion`](Self::wait_for_completion), invoking
    /// `observe` with a statistics snapshot roughly once per second until
    /// the dispatcher and every worker have joined.
    pub async fn wait_for_completion_with<F>(self, mut observe: F) -> Result<(), PoolError>
    where
        F: FnMut(PoolStats),
    {
        let mut dispatcher = self.dispatcher;
        let source_result = loop {
            tokio::select! {
                res = &mut dispatcher => break res,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    observe(self.stats.snapshot(self.config.concurrency));
                }
            }
        };

        // The observer stays live through the drain: workers may still be
        // finishing jobs long after the dispatcher has exited.
        let mut worker_joins = join_all(self.workers);
        let worker_results = loop {
            tokio::select! {
                results = &mut worker_joins => break results,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    observe(self.stats.snapshot(self.config.concurrency));
                }
            }
        };
        for result in worker_results {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }

        let stats = self.stats.snapshot(self.config.concurrency);
        info!(
            succeeded = stats.jobs_succeeded,
            failed = stats.jobs_failed,
            retries = stats.retries,
            "Worker pool stopped"
        );

        match source_result {
            Ok(result) => result,
            Err(e) => Err(PoolError::Source(format!("dispatcher panicked: {}", e))),
        }
    }
}

/// Feeds jobs from the source into the bounded channel until
/// cancellation or a fatal source error.
async fn dispatch<S: JobSource>(
    mut source: S,
    tx: mpsc::Sender<S::Job>,
    no_work_delay: Duration,
    shutdown: CancellationToken,
) -> Result<(), PoolError> {
    loop {
        let fetched = tokio::select! {
            _ = shutdown.cancelled() => break,
            fetched = source.next_job() => fetched,
        };
        match fetched {
            Ok(Fetch::Job(job)) => {
                // A full backlog blocks here, pausing the source.
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = tx.send(job) => {
                        if sent.is_err() {
                            // all workers gone
                            break;
                        }
                    }
                }
            }
            Ok(Fetch::NoWork) => {
                debug!(?no_work_delay, "No work available, sleeping");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(no_work_delay) => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Job source failed, stopping dispatch");
                shutdown.cancel();
                return Err(e);
            }
        }
    }
    debug!("Dispatcher stopped");
    Ok(())
    // tx drops here; workers drain the backlog and exit
}

/// A single worker pulling jobs off the shared channel.
struct Worker<T: TaskAction> {
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<T::Job>>>,
    action: Arc<T>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    stats: Arc<SharedPoolStats>,
}

impl<T: TaskAction> Worker<T> {
    async fn run(self) {
        debug!(worker_id = self.id, "Worker started");
        loop {
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = Self::next(&self.queue) => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job).await;
        }
        debug!(worker_id = self.id, "Worker stopped");
    }

    /// Receives the next job. Holding the lock only around `recv` keeps
    /// the other workers free to pull while this one processes.
    async fn next(queue: &Mutex<mpsc::Receiver<T::Job>>) -> Option<T::Job> {
        queue.lock().await.recv().await
    }

    /// Runs one job to a terminal outcome, retrying in place.
    async fn process(&self, job: T::Job) {
        self.stats.increment_active();
        let start = Instant::now();
        let mut retries: u32 = 0;

        let succeeded = loop {
            match self.action.run(&job).await {
                Ok(TaskOutcome::Ok) => break true,
                Ok(TaskOutcome::Failure) => {
                    warn!(worker_id = self.id, "Job failed, not retrying");
                    break false;
                }
                Ok(TaskOutcome::Retry) => {
                    let delay = self.retry.next_delay(retries);
                    retries += 1;
                    self.stats.record_retry();
                    debug!(worker_id = self.id, retries, ?delay, "Retrying job after backoff");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            warn!(worker_id = self.id, "Shutdown during retry wait, abandoning job");
                            break false;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(worker_id = self.id, error = %e, "Job raised an error, not retrying");
                    break false;
                }
            }
        };

        let duration = start.elapsed();
        if succeeded {
            self.stats.record_success(duration);
        } else {
            self.stats.record_failure(duration);
        }
        self.stats.decrement_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.backlog_multiplier, 2);
        assert_eq!(config.no_work_delay, Duration::from_secs(7));
        assert_eq!(config.backlog(), 8);
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new(2)
            .with_backlog_multiplier(3)
            .with_no_work_delay(Duration::from_millis(10))
            .with_retry(RetryPolicy::with_schedule(vec![Duration::ZERO]));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.backlog(), 6);
        assert_eq!(config.no_work_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_pool_config_backlog_never_zero() {
        let config = PoolConfig::new(0).with_backlog_multiplier(0);
        assert_eq!(config.backlog(), 1);
    }

    #[test]
    fn test_shared_stats_average() {
        let stats = SharedPoolStats::new();
        stats.record_success(Duration::from_millis(100));
        stats.record_success(Duration::from_millis(300));
        stats.record_failure(Duration::from_millis(200));

        let snapshot = stats.snapshot(4);
        assert_eq!(snapshot.concurrency, 4);
        assert_eq!(snapshot.jobs_succeeded, 2);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.total_finished(), 3);
        assert_eq!(snapshot.average_job_duration, Duration::from_millis(200));
    }

    #[test]
    fn test_empty_stats_snapshot() {
        let stats = SharedPoolStats::new();
        let snapshot = stats.snapshot(1);
        assert_eq!(snapshot.total_finished(), 0);
        assert_eq!(snapshot.average_job_duration, Duration::ZERO);
    }
}
