//! Pipeline assembly and ordered shutdown.
//!
//! ```text
//!  MessageSource -> JobConsumer -> [job queue] -> WorkerPool -> [result queue] -> ResultReporter -> StatusReporter
//! ```
//!
//! Shutdown runs strictly in pipeline order under one time budget:
//!
//! 1. stop ingestion and wait for the consumer to exit
//! 2. close the job queue
//! 3. wait for the workers to drain it
//! 4. close the result queue
//! 5. wait for the reporter to drain it
//! 6. close the status client
//!
//! In-flight and queued jobs are allowed to finish. If the budget runs out
//! during step 3 or 5 the pipeline token is cancelled: in-flight jobs are
//! aborted and whatever is still queued is abandoned.

use crate::config::WorkerConfig;
use crate::consumer::{ConsumerError, JobConsumer, MessageSource};
use crate::executor::ExecutorSet;
use crate::pool::{PoolSnapshot, WorkerPool};
use crate::queue::{bounded, QueueSender};
use crate::registry::{JobRegistry, RegistryError};
use crate::reporter::{ReporterHandle, ReporterStats, ResultReporter};
use crate::status::StatusReporter;
use job_platform_core::{Job, JobResult};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("job ingestion is already running")]
    AlreadyIngesting,
}

/// Sizing and timing of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub pool_size: usize,
    pub job_timeout: Duration,
    pub job_queue_capacity: usize,
    pub result_queue_capacity: usize,
    pub shutdown_timeout: Duration,
}

impl From<&WorkerConfig> for PipelineSettings {
    fn from(config: &WorkerConfig) -> Self {
        PipelineSettings {
            pool_size: config.pool.size,
            job_timeout: config.pool.job_timeout(),
            job_queue_capacity: config.pool.job_queue_capacity,
            result_queue_capacity: config.pool.result_queue_capacity,
            shutdown_timeout: config.shutdown.timeout(),
        }
    }
}

/// What happened during [`Pipeline::shutdown`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub elapsed: Duration,
    /// The budget ran out and remaining work was cancelled
    pub budget_exceeded: bool,
    pub pool: PoolSnapshot,
    /// `None` if the reporter task died
    pub reporter: Option<ReporterStats>,
    /// Set when ingestion ended with an error
    pub ingestion_error: Option<String>,
}

struct Ingestion {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), ConsumerError>>,
}

/// A running job pipeline
pub struct Pipeline<R> {
    settings: PipelineSettings,
    registry: Arc<JobRegistry>,
    jobs: QueueSender<Job>,
    results: QueueSender<JobResult>,
    pool: WorkerPool,
    reporter: ReporterHandle<R>,
    ingestion: Option<Ingestion>,
    ingestion_error: Option<String>,
    cancel: CancellationToken,
}

impl<R: StatusReporter + 'static> Pipeline<R> {
    /// Validate the registry, build the executors and start the worker pool
    /// and the result reporter. Ingestion is attached separately with
    /// [`attach_source`](Self::attach_source).
    pub fn start(
        config: &WorkerConfig,
        registry: Arc<JobRegistry>,
        status_client: R,
    ) -> Result<Self, PipelineError> {
        registry.validate_complete()?;
        let executors = registry.build_executors(config)?;

        Ok(Self::start_with_executors(
            PipelineSettings::from(config),
            registry,
            executors,
            status_client,
        ))
    }

    /// Start with a caller-supplied executor set. The registry is not
    /// checked against it; jobs without an executor fail with
    /// `unknown job type`.
    pub fn start_with_executors(
        settings: PipelineSettings,
        registry: Arc<JobRegistry>,
        executors: ExecutorSet,
        status_client: R,
    ) -> Self {
        let (jobs, job_rx) = bounded(settings.job_queue_capacity);
        let (results, result_rx) = bounded(settings.result_queue_capacity);
        let cancel = CancellationToken::new();

        let pool = WorkerPool::start(
            settings.pool_size,
            settings.job_timeout,
            executors,
            job_rx,
            results.clone(),
            cancel.clone(),
        );
        let reporter = ResultReporter::start(status_client, result_rx, cancel.clone());

        info!(
            "Pipeline started (workers: {}, job queue: {}, result queue: {})",
            settings.pool_size, settings.job_queue_capacity, settings.result_queue_capacity
        );

        Pipeline {
            settings,
            registry,
            jobs,
            results,
            pool,
            reporter,
            ingestion: None,
            ingestion_error: None,
            cancel,
        }
    }

    /// Start consuming jobs from `source`
    pub fn attach_source<S>(&mut self, source: S) -> Result<(), PipelineError>
    where
        S: MessageSource + 'static,
    {
        if self.ingestion.is_some() {
            return Err(PipelineError::AlreadyIngesting);
        }

        let cancel = self.cancel.child_token();
        let consumer = JobConsumer::new(source, self.registry.clone(), self.jobs.clone());
        let handle = tokio::spawn(consumer.run(cancel.clone()));

        self.ingestion = Some(Ingestion { cancel, handle });
        Ok(())
    }

    /// Resolves when ingestion stops on its own, which only happens on a
    /// fatal source error. Pending forever if no source is attached.
    /// Cancel-safe.
    pub async fn ingestion_stopped(&mut self) -> Result<(), ConsumerError> {
        let Some(ingestion) = self.ingestion.as_mut() else {
            return futures::future::pending().await;
        };

        let outcome = match (&mut ingestion.handle).await {
            Ok(outcome) => outcome,
            Err(e) => Err(ConsumerError::Task(e.to_string())),
        };
        self.ingestion = None;
        self.record_ingestion_outcome(&outcome);
        outcome
    }

    fn record_ingestion_outcome(&mut self, outcome: &Result<(), ConsumerError>) {
        if let Err(e) = outcome {
            self.ingestion_error = Some(e.to_string());
        }
    }

    /// Producer handle on the job queue, for in-process submission
    pub fn job_sender(&self) -> QueueSender<Job> {
        self.jobs.clone()
    }

    /// Jobs waiting for a worker
    pub fn queued_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Results waiting for the reporter
    pub fn queued_results(&self) -> usize {
        self.results.len()
    }

    pub fn pool_stats(&self) -> PoolSnapshot {
        self.pool.stats()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Drain and stop the pipeline. Never fails; problems are logged and
    /// summarised in the report.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let budget = self.settings.shutdown_timeout;
        let started = Instant::now();
        let deadline = started + budget;
        let mut budget_exceeded = false;

        info!("Starting graceful shutdown (timeout: {:?})", budget);

        if let Some(Ingestion { cancel, mut handle }) = self.ingestion.take() {
            info!("Stopping job ingestion");
            cancel.cancel();

            let stopped = tokio::time::timeout_at(deadline, &mut handle).await;
            let outcome = match stopped {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => Err(ConsumerError::Task(e.to_string())),
                Err(_) => {
                    warn!("Job consumer did not stop within the shutdown budget, aborting it");
                    budget_exceeded = true;
                    handle.abort();
                    Ok(())
                }
            };
            self.record_ingestion_outcome(&outcome);
        }

        info!("Closing job queue ({} jobs still queued)", self.jobs.len());
        self.jobs.close();

        info!("Waiting for {} workers to finish", self.pool.size());
        if tokio::time::timeout_at(deadline, self.pool.wait()).await.is_err() {
            warn!(
                "Shutdown budget exceeded while draining jobs, cancelling {} queued jobs and in-flight work",
                self.jobs.len()
            );
            budget_exceeded = true;
            self.cancel.cancel();
            self.pool.wait().await;
        }

        info!("Closing result queue ({} results still queued)", self.results.len());
        self.results.close();

        info!("Waiting for result reporter to finish");
        let drained = tokio::time::timeout_at(deadline, self.reporter.wait()).await;
        let finished = match drained {
            Ok(finished) => finished,
            Err(_) => {
                warn!(
                    "Shutdown budget exceeded while reporting results, abandoning {} results",
                    self.results.len()
                );
                budget_exceeded = true;
                self.cancel.cancel();
                self.reporter.wait().await
            }
        };

        let reporter = match finished {
            Some((mut client, stats)) => {
                if let Err(e) = client.close().await {
                    error!("Error closing status client: {}", e);
                }
                Some(stats)
            }
            None => None,
        };

        self.cancel.cancel();

        let elapsed = started.elapsed();
        if budget_exceeded || elapsed > budget {
            budget_exceeded = true;
            warn!("Shutdown timeout exceeded ({:?} > {:?})", elapsed, budget);
        } else {
            info!("Graceful shutdown completed in {:?}", elapsed);
        }

        ShutdownReport {
            elapsed,
            budget_exceeded,
            pool: self.pool.stats(),
            reporter,
            ingestion_error: self.ingestion_error.take(),
        }
    }
}
