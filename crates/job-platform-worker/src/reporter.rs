//! Result reporter.
//!
//! A single task drains the result queue and forwards each outcome to the
//! status service, one call at a time. It owns the [`StatusReporter`] and
//! hands it back when it exits, so the shutdown sequence can close it last.

use crate::queue::QueueReceiver;
use crate::status::{StatusReporter, StatusUpdate};
use job_platform_core::{JobResult, JobStatus};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome counters of a reporter run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReporterStats {
    /// Accepted by the status service
    pub sent: u64,
    /// Forwarding failed (transport error, timeout or rejection)
    pub failed: u64,
    /// Not forwardable (non-terminal status or unencodable payload)
    pub dropped: u64,
    /// Left in the result queue because the reporter was cancelled
    pub abandoned: u64,
}

#[derive(Serialize)]
struct SuccessPayload<'a> {
    result: &'a str,
    status: JobStatus,
}

/// Result payload sent for a completed job:
/// `{"result":"<output>","status":"COMPLETED"}`
pub fn success_payload(output: &str) -> serde_json::Result<String> {
    serde_json::to_string(&SuccessPayload {
        result: output,
        status: JobStatus::Completed,
    })
}

/// Running reporter task
pub struct ReporterHandle<R> {
    handle: JoinHandle<(R, ReporterStats)>,
}

impl<R> ReporterHandle<R> {
    /// Wait for the reporter to exit and take back the status client.
    ///
    /// Returns `None` only if the reporter task itself died.
    pub async fn wait(&mut self) -> Option<(R, ReporterStats)> {
        match (&mut self.handle).await {
            Ok(finished) => Some(finished),
            Err(e) => {
                error!("Result reporter task failed: {}", e);
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub struct ResultReporter<R> {
    client: R,
    results: QueueReceiver<JobResult>,
    cancel: CancellationToken,
    stats: ReporterStats,
}

impl<R: StatusReporter + 'static> ResultReporter<R> {
    /// Spawn the reporter. It stops when the result queue is closed and
    /// drained, or immediately when `cancel` fires.
    pub fn start(
        client: R,
        results: QueueReceiver<JobResult>,
        cancel: CancellationToken,
    ) -> ReporterHandle<R> {
        let reporter = ResultReporter {
            client,
            results,
            cancel,
            stats: ReporterStats::default(),
        };

        ReporterHandle {
            handle: tokio::spawn(reporter.run()),
        }
    }

    async fn run(mut self) -> (R, ReporterStats) {
        info!("Result reporter started");

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.abandon();
                    break;
                }
                result = self.results.recv() => match result {
                    Some(result) => result,
                    None => {
                        info!("Result queue drained, reporter stopping");
                        break;
                    }
                },
            };

            let job_id = result.job_id;
            let cancel = self.cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(job_id, "Reporter cancelled while forwarding result");
                    self.stats.abandoned += 1;
                    self.abandon();
                    break;
                }
                _ = self.forward(result) => {}
            }
        }

        info!(
            sent = self.stats.sent,
            failed = self.stats.failed,
            dropped = self.stats.dropped,
            abandoned = self.stats.abandoned,
            "Result reporter stopped"
        );
        (self.client, self.stats)
    }

    fn abandon(&mut self) {
        let remaining = self.results.len() as u64;
        if remaining > 0 {
            warn!("Reporter cancelled, abandoning {} queued results", remaining);
        }
        self.stats.abandoned += remaining;
    }

    async fn forward(&mut self, result: JobResult) {
        let job_id = result.job_id;

        let update = match result.status {
            JobStatus::Completed => {
                let output = result.result.unwrap_or_default();
                match success_payload(&output) {
                    Ok(payload) => StatusUpdate::completed(job_id, payload),
                    Err(e) => {
                        error!(job_id, error = %e, "Failed to encode result payload, dropping");
                        self.stats.dropped += 1;
                        return;
                    }
                }
            }
            JobStatus::Failed => StatusUpdate::failed(job_id, result.error.unwrap_or_default()),
            other => {
                error!(job_id, status = %other, "Invalid job status in result queue, dropping");
                self.stats.dropped += 1;
                return;
            }
        };

        let status = update.status;
        match self.client.report_status(update).await {
            Ok(()) => {
                debug!(job_id, status = %status, "Result sent to status service");
                self.stats.sent += 1;
            }
            Err(e) => {
                error!(job_id, status = %status, error = %e, "Failed to send result to status service");
                self.stats.failed += 1;
            }
        }
    }
}
