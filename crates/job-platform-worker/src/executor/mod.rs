//! Executable capabilities bound to job types.
//!
//! Every job type gets one long-lived [`Executor`] instance built by a
//! factory at startup. The registration list lives in
//! [`default_registrations`] so the set of supported types is explicit.

mod http_get;
mod image_resize;
mod sleep;

pub use http_get::{HttpGetExecutor, HttpGetPayload};
pub use image_resize::{ImageResizeExecutor, ImageResizePayload};
pub use sleep::{SleepExecutor, SleepPayload};

use crate::registry::Registration;
use async_trait::async_trait;
use job_platform_core::JobType;
use job_platform_protocol::TaskType;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result type for executors
pub type ExecutorResult = Result<String, ExecutorError>;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("invalid payload format: {0}")]
    InvalidPayload(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("execution cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Trait for job executors
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one job. Implementations must return promptly once `cancel` fires.
    async fn execute(&self, cancel: CancellationToken, payload: &str) -> ExecutorResult;
}

/// Decode a JSON payload into the executor's payload type
pub fn parse_payload<T: DeserializeOwned>(payload: &str) -> Result<T, ExecutorError> {
    serde_json::from_str(payload).map_err(|e| ExecutorError::InvalidPayload(e.to_string()))
}

/// Executors built from the registry, keyed by job type
#[derive(Clone, Default)]
pub struct ExecutorSet {
    executors: HashMap<JobType, Arc<dyn Executor>>,
}

impl ExecutorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job_type: JobType, executor: Arc<dyn Executor>) {
        self.executors.insert(job_type, executor);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Executor>> {
        self.executors.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.executors.contains_key(&job_type)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// The job types this worker serves, with their wire codes and factories
pub fn default_registrations() -> Vec<Registration> {
    vec![
        Registration::new(JobType::HttpGet, TaskType::HttpGet, |config| {
            let executor = HttpGetExecutor::new(config.executors.http_timeout())?;
            Ok(Arc::new(executor) as Arc<dyn Executor>)
        }),
        Registration::new(JobType::ImageResize, TaskType::ImageResize, |_| {
            Ok(Arc::new(ImageResizeExecutor) as Arc<dyn Executor>)
        }),
        Registration::new(JobType::Sleep, TaskType::Sleep, |_| {
            Ok(Arc::new(SleepExecutor) as Arc<dyn Executor>)
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
    }

    #[test]
    fn test_parse_payload() {
        let sample: Sample = parse_payload("{\"name\":\"x\"}").unwrap();
        assert_eq!(sample.name, "x");

        let err = parse_payload::<Sample>("not json").unwrap_err();
        assert!(err.to_string().starts_with("invalid payload format"));
    }

    #[test]
    fn test_default_registrations_cover_every_job_type() {
        let registrations = default_registrations();
        for job_type in JobType::ALL {
            assert!(
                registrations.iter().any(|r| r.job_type() == job_type),
                "missing registration for {}",
                job_type
            );
        }
    }
}
