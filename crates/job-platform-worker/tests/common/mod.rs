// Shared fixtures for the worker integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use job_platform_protocol::{JobTask, TaskType};
use job_platform_worker::config::WorkerConfig;
use job_platform_worker::{
    default_registrations, ConsumerError, JobRegistry, MessageSource, ReportError, SourceMessage,
    StatusReporter, StatusUpdate,
};
use parking_lot::Mutex;
use prost::Message as _;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub fn registry() -> Arc<JobRegistry> {
    Arc::new(JobRegistry::from_registrations(default_registrations()).unwrap())
}

pub fn config(pool_size: usize, job_timeout_ms: u64, shutdown_timeout_ms: u64) -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.pool.size = pool_size;
    config.pool.job_timeout_ms = job_timeout_ms;
    config.shutdown.timeout_ms = shutdown_timeout_ms;
    config
}

pub fn sleep_payload(ms: u64) -> String {
    format!("{{\"duration_ms\":{}}}", ms)
}

pub fn encoded_task(job_id: i64, task_type: i32, payload: &str) -> Vec<u8> {
    JobTask {
        job_id,
        r#type: task_type,
        payload: payload.to_string(),
        created_at: 1_700_000_000,
    }
    .encode_to_vec()
}

pub fn encoded_sleep(job_id: i64, ms: u64) -> Vec<u8> {
    encoded_task(job_id, TaskType::Sleep as i32, &sleep_payload(ms))
}

/// Status client that records every update with the time it arrived
#[derive(Clone)]
pub struct RecordingReporter {
    pub updates: Arc<Mutex<Vec<(StatusUpdate, Instant)>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        RecordingReporter {
            updates: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn job_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.updates.lock().iter().map(|(u, _)| u.job_id).collect();
        ids.sort();
        ids
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report_status(&self, update: StatusUpdate) -> Result<(), ReportError> {
        self.updates.lock().push((update, Instant::now()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ReportError> {
        *self.closed.lock() = true;
        Ok(())
    }
}

/// In-memory job queue subscription fed through a [`MemoryFeed`]
pub struct MemorySource {
    records: mpsc::UnboundedReceiver<Result<SourceMessage, ConsumerError>>,
    pub committed: Arc<Mutex<Vec<i64>>>,
    pub closed: Arc<Mutex<bool>>,
}

pub struct MemoryFeed {
    tx: mpsc::UnboundedSender<Result<SourceMessage, ConsumerError>>,
    next_offset: i64,
}

impl MemoryFeed {
    /// Publish a record; returns its offset
    pub fn push(&mut self, value: Vec<u8>) -> i64 {
        let offset = self.next_offset;
        self.next_offset += 1;
        let _ = self.tx.send(Ok(SourceMessage {
            partition: 0,
            offset,
            value,
        }));
        offset
    }

    /// Make the next fetch fail
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(ConsumerError::Fetch(reason.to_string())));
    }
}

pub fn memory_source() -> (MemoryFeed, MemorySource) {
    let (tx, records) = mpsc::unbounded_channel();
    (
        MemoryFeed { tx, next_offset: 0 },
        MemorySource {
            records,
            committed: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(false)),
        },
    )
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn fetch(&mut self) -> Result<SourceMessage, ConsumerError> {
        match self.records.recv().await {
            Some(record) => record,
            None => futures::future::pending().await,
        }
    }

    async fn commit(&mut self, message: &SourceMessage) -> Result<(), ConsumerError> {
        self.committed.lock().push(message.offset);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConsumerError> {
        *self.closed.lock() = true;
        Ok(())
    }
}
