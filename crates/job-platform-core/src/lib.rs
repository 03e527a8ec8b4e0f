mod job;
mod error;

pub use job::{Job, JobId, JobPayload, JobResult, JobStatus, JobType};
pub use error::{JobError, Result};
