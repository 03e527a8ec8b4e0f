use crate::{JobError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier assigned to a job by the submitting service
pub type JobId = i64;

/// Job payload (type-specific JSON text)
pub type JobPayload = String;

/// Closed set of job kinds this worker knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Fetch a URL over HTTP
    HttpGet,
    /// Resize an image
    ImageResize,
    /// Wait for a fixed duration
    Sleep,
}

impl JobType {
    /// Every supported job type, in registration order
    pub const ALL: [JobType; 3] = [JobType::HttpGet, JobType::ImageResize, JobType::Sleep];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::HttpGet => "HTTP_GET",
            JobType::ImageResize => "IMAGE_RESIZE",
            JobType::Sleep => "SLEEP",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        JobType::ALL
            .into_iter()
            .find(|jt| jt.as_str() == s)
            .ok_or_else(|| JobError::UnknownJobType(s.to_string()))
    }
}

/// Job status as tracked by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job was accepted by the platform but not picked up yet
    Created,
    /// Job is being executed
    InProgress,
    /// Job finished successfully
    Completed,
    /// Job finished with an error
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Completed and Failed are the only statuses a worker may report
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATED" => Ok(JobStatus::Created),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(JobError::UnknownStatus(other.to_string())),
        }
    }
}

/// A unit of work decoded from the job queue.
///
/// Jobs are moved through the pipeline rather than shared; the type is
/// deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Which executor runs this job
    pub job_type: JobType,

    /// Executor-specific payload
    pub payload: JobPayload,

    /// When the platform created the job
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, job_type: JobType, payload: impl Into<JobPayload>) -> Self {
        Job {
            id,
            job_type,
            payload: payload.into(),
            created_at: Utc::now(),
        }
    }

    /// Build a job from a Unix timestamp in seconds, as carried on the wire
    pub fn from_wire(
        id: JobId,
        job_type: JobType,
        payload: JobPayload,
        created_at_secs: i64,
    ) -> Result<Self> {
        let created_at = DateTime::from_timestamp(created_at_secs, 0)
            .ok_or(JobError::InvalidTimestamp(created_at_secs))?;

        Ok(Job {
            id,
            job_type,
            payload,
            created_at,
        })
    }
}

/// Outcome of running exactly one job
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,

    pub status: JobStatus,

    /// Executor output (if completed)
    pub result: Option<String>,

    /// Error message (if failed)
    pub error: Option<String>,
}

impl JobResult {
    pub fn completed(job_id: JobId, output: impl Into<String>) -> Self {
        JobResult {
            job_id,
            status: JobStatus::Completed,
            result: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        JobResult {
            job_id,
            status: JobStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
