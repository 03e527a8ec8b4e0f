//! Client side of the status service.
//!
//! [`StatusReporter`] is the seam the result reporter talks to;
//! [`GrpcStatusClient`] implements it with a unary tonic call to
//! `JobStatusService.UpdateJobStatus`.

use async_trait::async_trait;
use job_platform_core::{JobId, JobStatus};
use job_platform_protocol::{
    update_job_status_request::JobStatus as WireStatus, UpdateJobStatusRequest,
    UpdateJobStatusResponse,
};
use std::time::Duration;
use thiserror::Error;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::info;

const UPDATE_JOB_STATUS_PATH: &str = "/jobplatform.JobStatusService/UpdateJobStatus";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("invalid status service address: {0}")]
    InvalidAddress(String),

    #[error("status {0} cannot be reported")]
    InvalidStatus(JobStatus),

    #[error("status service unavailable: {0}")]
    Unavailable(String),

    #[error("gRPC call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("status update timed out after {0:?}")]
    Timeout(Duration),

    #[error("status service rejected the update for job {0}")]
    Rejected(JobId),

    #[error("status client is closed")]
    Closed,
}

/// One status update for the status service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Result payload (completed jobs)
    pub result: String,
    /// Error text (failed jobs)
    pub error_message: String,
}

impl StatusUpdate {
    pub fn completed(job_id: JobId, result: impl Into<String>) -> Self {
        StatusUpdate {
            job_id,
            status: JobStatus::Completed,
            result: result.into(),
            error_message: String::new(),
        }
    }

    pub fn failed(job_id: JobId, error_message: impl Into<String>) -> Self {
        StatusUpdate {
            job_id,
            status: JobStatus::Failed,
            result: String::new(),
            error_message: error_message.into(),
        }
    }

    fn into_request(self) -> Result<UpdateJobStatusRequest, ReportError> {
        let status =
            WireStatus::from_terminal(self.status).ok_or(ReportError::InvalidStatus(self.status))?;

        Ok(UpdateJobStatusRequest {
            job_id: self.job_id,
            status: status as i32,
            result: self.result,
            error_message: self.error_message,
        })
    }
}

/// Delivers job outcomes to the status service
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Report one outcome. A non-success answer is an error, same as a
    /// transport failure.
    async fn report_status(&self, update: StatusUpdate) -> Result<(), ReportError>;

    /// Release the connection
    async fn close(&mut self) -> Result<(), ReportError>;
}

/// gRPC status service client
pub struct GrpcStatusClient {
    inner: Option<Grpc<Channel>>,
    address: String,
    timeout: Duration,
}

impl GrpcStatusClient {
    /// Create a client without connecting; the channel connects on first use
    /// and reconnects as needed.
    pub fn connect_lazy(address: &str, timeout: Duration) -> Result<Self, ReportError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| ReportError::InvalidAddress(format!("{}: {}", address, e)))?
            .connect_timeout(timeout)
            .timeout(timeout);

        Ok(GrpcStatusClient {
            inner: Some(Grpc::new(endpoint.connect_lazy())),
            address: address.to_string(),
            timeout,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn update_job_status(
        grpc: &mut Grpc<Channel>,
        request: UpdateJobStatusRequest,
    ) -> Result<UpdateJobStatusResponse, ReportError> {
        grpc.ready()
            .await
            .map_err(|e| ReportError::Unavailable(e.to_string()))?;

        let codec: ProstCodec<UpdateJobStatusRequest, UpdateJobStatusResponse> =
            ProstCodec::default();
        let path = PathAndQuery::from_static(UPDATE_JOB_STATUS_PATH);

        let response = grpc.unary(tonic::Request::new(request), path, codec).await?;
        Ok(response.into_inner())
    }
}

fn check_response(job_id: JobId, response: &UpdateJobStatusResponse) -> Result<(), ReportError> {
    if response.success {
        Ok(())
    } else {
        Err(ReportError::Rejected(job_id))
    }
}

#[async_trait]
impl StatusReporter for GrpcStatusClient {
    async fn report_status(&self, update: StatusUpdate) -> Result<(), ReportError> {
        let mut grpc = self.inner.clone().ok_or(ReportError::Closed)?;
        let job_id = update.job_id;
        let request = update.into_request()?;

        let response = tokio::time::timeout(self.timeout, Self::update_job_status(&mut grpc, request))
            .await
            .map_err(|_| ReportError::Timeout(self.timeout))??;

        check_response(job_id, &response)
    }

    async fn close(&mut self) -> Result<(), ReportError> {
        if self.inner.take().is_some() {
            info!("Closed status service client ({})", self.address);
        }
        Ok(())
    }
}
