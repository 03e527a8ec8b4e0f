use super::{parse_payload, Executor, ExecutorError, ExecutorResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
pub struct HttpGetPayload {
    pub url: String,
}

/// Fetches a URL and reports the status code and body length
pub struct HttpGetExecutor {
    client: reqwest::Client,
}

impl HttpGetExecutor {
    pub fn new(timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpGetExecutor { client })
    }
}

#[async_trait]
impl Executor for HttpGetExecutor {
    async fn execute(&self, cancel: CancellationToken, payload: &str) -> ExecutorResult {
        let request: HttpGetPayload = parse_payload(payload)?;

        let fetch = async {
            let response = self.client.get(&request.url).send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, ExecutorError>(format!(
                "Status: {}, BodyLen: {}",
                status.as_u16(),
                body.len()
            ))
        };

        tokio::select! {
            result = fetch => result,
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
        }
    }
}
