use crate::executor::ExecutorSet;
use crate::queue::{QueueClosed, QueueReceiver, QueueSender};
use chrono::Utc;
use job_platform_core::{Job, JobResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CANCELLED_MESSAGE: &str = "job cancelled: pipeline shutting down";

/// Counters shared by all workers of a pool
#[derive(Debug, Default)]
pub struct PoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub completed: u64,
    pub failed: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-size pool of workers competing for jobs on the job queue
pub struct WorkerPool {
    size: usize,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Spawn `size` workers.
    ///
    /// Each job runs under `job_timeout` with a child token of `cancel`.
    /// Cancelling `cancel` aborts in-flight jobs and stops every worker
    /// without waiting for the job queue to drain.
    pub fn start(
        size: usize,
        job_timeout: Duration,
        executors: ExecutorSet,
        jobs: QueueReceiver<Job>,
        results: QueueSender<JobResult>,
        cancel: CancellationToken,
    ) -> Self {
        let executors = Arc::new(executors);
        let stats = Arc::new(PoolStats::default());

        let handles = (0..size)
            .map(|id| {
                let worker = PoolWorker {
                    id,
                    job_timeout,
                    executors: executors.clone(),
                    jobs: jobs.clone(),
                    results: results.clone(),
                    cancel: cancel.clone(),
                    stats: stats.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!("Worker pool started (size: {}, job timeout: {:?})", size, job_timeout);

        WorkerPool {
            size,
            handles,
            stats,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> PoolSnapshot {
        self.stats.snapshot()
    }

    /// Wait until every worker has exited.
    ///
    /// Cancel-safe: if the returned future is dropped, a later call keeps
    /// waiting for the workers that are still running.
    pub async fn wait(&mut self) {
        while let Some(handle) = self.handles.last_mut() {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
            self.handles.pop();
        }
    }
}

struct PoolWorker {
    id: usize,
    job_timeout: Duration,
    executors: Arc<ExecutorSet>,
    jobs: QueueReceiver<Job>,
    results: QueueSender<JobResult>,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
}

impl PoolWorker {
    async fn run(self) {
        debug!(worker_id = self.id, "Worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(worker_id = self.id, "Worker stopped by cancellation");
                    return;
                }
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            debug!(
                worker_id = self.id,
                job_id = job.id,
                job_type = %job.job_type,
                queued_ms = (Utc::now() - job.created_at).num_milliseconds(),
                "Processing job"
            );

            let result = self.process(job).await;
            let job_id = result.job_id;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(
                        worker_id = self.id,
                        job_id,
                        "Pipeline cancelled, result not delivered"
                    );
                    return;
                }
                sent = self.results.send(result) => {
                    if let Err(QueueClosed(result)) = sent {
                        error!(job_id = result.job_id, "Result queue closed, dropping result");
                    }
                }
            }
        }

        debug!(worker_id = self.id, "Worker stopped, job queue drained");
    }

    /// Run one job to a terminal result. Never fails.
    async fn process(&self, job: Job) -> JobResult {
        let Job {
            id,
            job_type,
            payload,
            ..
        } = job;

        let Some(executor) = self.executors.get(job_type) else {
            error!(job_id = id, job_type = %job_type, "No executor for job type");
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return JobResult::failed(id, format!("unknown job type: {}", job_type));
        };

        let job_cancel = self.cancel.child_token();
        let token = job_cancel.clone();
        let mut handle = tokio::spawn(async move { executor.execute(token, &payload).await });
        let abort = handle.abort_handle();

        let outcome = tokio::select! {
            biased;
            _ = job_cancel.cancelled() => {
                abort.abort();
                Err(CANCELLED_MESSAGE.to_string())
            }
            joined = tokio::time::timeout(self.job_timeout, &mut handle) => match joined {
                Ok(Ok(Ok(output))) => Ok(output),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(e)) if e.is_panic() => Err("job panicked during execution".to_string()),
                Ok(Err(_)) => Err(CANCELLED_MESSAGE.to_string()),
                Err(_) => {
                    abort.abort();
                    Err(format!("job timed out after {:?}", self.job_timeout))
                }
            },
        };
        job_cancel.cancel();

        match outcome {
            Ok(output) => {
                debug!(job_id = id, "Job completed");
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                JobResult::completed(id, output)
            }
            Err(error) => {
                error!(job_id = id, job_type = %job_type, error = %error, "Job failed");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                JobResult::failed(id, error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, ExecutorResult, SleepExecutor};
    use crate::queue::bounded;
    use async_trait::async_trait;
    use job_platform_core::{JobStatus, JobType};

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, _cancel: CancellationToken, payload: &str) -> ExecutorResult {
            Ok(payload.to_string())
        }
    }

    struct PanicExecutor;

    #[async_trait]
    impl Executor for PanicExecutor {
        async fn execute(&self, _cancel: CancellationToken, _payload: &str) -> ExecutorResult {
            panic!("executor bug");
        }
    }

    fn executors() -> ExecutorSet {
        let mut set = ExecutorSet::new();
        set.insert(JobType::HttpGet, Arc::new(EchoExecutor));
        set.insert(JobType::Sleep, Arc::new(SleepExecutor));
        set
    }

    async fn run_jobs(executors: ExecutorSet, job_timeout: Duration, jobs: Vec<Job>) -> Vec<JobResult> {
        let (job_tx, job_rx) = bounded(16);
        let (result_tx, result_rx) = bounded(16);
        let mut pool = WorkerPool::start(
            2,
            job_timeout,
            executors,
            job_rx,
            result_tx.clone(),
            CancellationToken::new(),
        );

        for job in jobs {
            job_tx.send(job).await.unwrap();
        }
        job_tx.close();
        pool.wait().await;
        result_tx.close();

        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        results.sort_by_key(|r| r.job_id);
        results
    }

    #[tokio::test]
    async fn test_completed_job() {
        let results = run_jobs(
            executors(),
            Duration::from_secs(1),
            vec![Job::new(1, JobType::HttpGet, "hello")],
        )
        .await;

        assert_eq!(results, vec![JobResult::completed(1, "hello")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_failed_not_completed() {
        let results = run_jobs(
            executors(),
            Duration::from_millis(100),
            vec![Job::new(1, JobType::Sleep, "{\"duration_ms\":5000}")],
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, JobStatus::Failed);
        assert_eq!(results[0].error.as_deref(), Some("job timed out after 100ms"));
    }

    #[tokio::test]
    async fn test_unknown_job_type_does_not_stop_worker() {
        let results = run_jobs(
            executors(),
            Duration::from_secs(1),
            vec![
                Job::new(1, JobType::ImageResize, "{}"),
                Job::new(2, JobType::HttpGet, "after"),
            ],
        )
        .await;

        assert_eq!(results[0].status, JobStatus::Failed);
        assert_eq!(results[0].error.as_deref(), Some("unknown job type: IMAGE_RESIZE"));
        assert_eq!(results[1], JobResult::completed(2, "after"));
    }

    #[tokio::test]
    async fn test_executor_error_becomes_failed_result() {
        let results = run_jobs(
            executors(),
            Duration::from_secs(1),
            vec![Job::new(5, JobType::Sleep, "not json")],
        )
        .await;

        assert_eq!(results[0].status, JobStatus::Failed);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("invalid payload format"));
    }

    #[tokio::test]
    async fn test_panicking_executor_is_contained() {
        let mut set = executors();
        set.insert(JobType::ImageResize, Arc::new(PanicExecutor));

        let results = run_jobs(
            set,
            Duration::from_secs(1),
            vec![
                Job::new(1, JobType::ImageResize, "{}"),
                Job::new(2, JobType::HttpGet, "still alive"),
            ],
        )
        .await;

        assert_eq!(results[0].error.as_deref(), Some("job panicked during execution"));
        assert_eq!(results[1], JobResult::completed(2, "still alive"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_in_flight_jobs() {
        let (job_tx, job_rx) = bounded(4);
        let (result_tx, result_rx) = bounded(4);
        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::start(
            1,
            Duration::from_secs(60),
            executors(),
            job_rx,
            result_tx,
            cancel.clone(),
        );

        job_tx
            .send(Job::new(1, JobType::Sleep, "{\"duration_ms\":30000}"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        cancel.cancel();
        pool.wait().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(result_rx.is_empty());
        assert_eq!(pool.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_result_queue_full_drops_result() {
        let (job_tx, job_rx) = bounded(4);
        let (result_tx, result_rx) = bounded(1);
        result_tx.send(JobResult::completed(0, "earlier")).await.unwrap();

        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::start(
            1,
            Duration::from_secs(1),
            executors(),
            job_rx,
            result_tx,
            cancel.clone(),
        );

        job_tx.send(Job::new(1, JobType::HttpGet, "done")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().completed, 1);

        cancel.cancel();
        pool.wait().await;

        assert_eq!(result_rx.len(), 1);
        assert_eq!(result_rx.recv().await.unwrap().job_id, 0);
    }

    #[tokio::test]
    async fn test_stats_count_outcomes() {
        let (job_tx, job_rx) = bounded(4);
        let (result_tx, result_rx) = bounded(4);
        let mut pool = WorkerPool::start(
            3,
            Duration::from_secs(1),
            executors(),
            job_rx,
            result_tx,
            CancellationToken::new(),
        );
        assert_eq!(pool.size(), 3);

        job_tx.send(Job::new(1, JobType::HttpGet, "a")).await.unwrap();
        job_tx.send(Job::new(2, JobType::Sleep, "bad")).await.unwrap();
        job_tx.close();
        pool.wait().await;

        assert_eq!(pool.stats(), PoolSnapshot { completed: 1, failed: 1 });
        assert_eq!(result_rx.len(), 2);
    }
}
