use super::{parse_payload, Executor, ExecutorError, ExecutorResult};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
pub struct ImageResizePayload {
    pub image_url: String,
    pub width: u32,
    pub height: u32,
}

/// Simulated image resize; validates the request and reports the target size
pub struct ImageResizeExecutor;

#[async_trait]
impl Executor for ImageResizeExecutor {
    async fn execute(&self, cancel: CancellationToken, payload: &str) -> ExecutorResult {
        let request: ImageResizePayload = parse_payload(payload)?;

        if request.image_url.is_empty() {
            return Err(ExecutorError::InvalidPayload("image_url is empty".to_string()));
        }
        if request.width == 0 || request.height == 0 {
            return Err(ExecutorError::InvalidPayload(format!(
                "target size must be positive, got {}x{}",
                request.width, request.height
            )));
        }
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        Ok(format!(
            "Image resized to {}x{} (simulated)",
            request.width, request.height
        ))
    }
}
