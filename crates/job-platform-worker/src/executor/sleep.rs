use super::{parse_payload, Executor, ExecutorError, ExecutorResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
pub struct SleepPayload {
    pub duration_ms: u64,
}

/// Waits for the requested duration
pub struct SleepExecutor;

#[async_trait]
impl Executor for SleepExecutor {
    async fn execute(&self, cancel: CancellationToken, payload: &str) -> ExecutorResult {
        let request: SleepPayload = parse_payload(payload)?;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(request.duration_ms)) => {
                Ok(format!("Slept {} ms", request.duration_ms))
            }
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let output = SleepExecutor
            .execute(CancellationToken::new(), "{\"duration_ms\":250}")
            .await
            .unwrap();
        assert_eq!(output, "Slept 250 ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_honors_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let result = SleepExecutor.execute(cancel, "{\"duration_ms\":60000}").await;

        assert!(matches!(result, Err(ExecutorError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sleep_rejects_bad_payload() {
        let result = SleepExecutor
            .execute(CancellationToken::new(), "{\"duration\":5}")
            .await;
        assert!(matches!(result, Err(ExecutorError::InvalidPayload(_))));
    }
}
