//! Protobuf messages shared with the job platform service.
//!
//! These mirror `jobplatform.proto`: `JobTask` is what the platform publishes
//! to the job topic, `UpdateJobStatusRequest`/`UpdateJobStatusResponse` are
//! the `JobStatusService.UpdateJobStatus` call.

use job_platform_core::JobStatus;

/// Task type code carried in `JobTask.type`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TaskType {
    UnknownType = 0,
    HttpGet = 1,
    ImageResize = 2,
    Sleep = 3,
}

impl TaskType {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            TaskType::UnknownType => "UNKNOWN_TYPE",
            TaskType::HttpGet => "HTTP_GET",
            TaskType::ImageResize => "IMAGE_RESIZE",
            TaskType::Sleep => "SLEEP",
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JobTask {
    #[prost(int64, tag = "1")]
    pub job_id: i64,
    #[prost(enumeration = "TaskType", tag = "2")]
    pub r#type: i32,
    #[prost(string, tag = "3")]
    pub payload: String,
    /// Unix timestamp in seconds
    #[prost(int64, tag = "4")]
    pub created_at: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateJobStatusRequest {
    #[prost(int64, tag = "1")]
    pub job_id: i64,
    #[prost(enumeration = "update_job_status_request::JobStatus", tag = "2")]
    pub status: i32,
    #[prost(string, tag = "3")]
    pub result: String,
    #[prost(string, tag = "4")]
    pub error_message: String,
}

pub mod update_job_status_request {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum JobStatus {
        StatusUnspecified = 0,
        Completed = 1,
        Failed = 2,
    }
}

impl update_job_status_request::JobStatus {
    /// Wire status for a terminal job status; `None` for statuses a worker
    /// must never report.
    pub fn from_terminal(status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Completed => Some(Self::Completed),
            JobStatus::Failed => Some(Self::Failed),
            JobStatus::Created | JobStatus::InProgress => None,
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateJobStatusResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
}
