//! Job ingestion.
//!
//! [`JobConsumer`] reads protobuf `JobTask` records from a [`MessageSource`],
//! turns them into [`Job`]s and pushes them onto the job queue. A record is
//! committed only after its job has been accepted by the queue, so a crash
//! between fetch and hand-off leads to redelivery rather than loss.
//! Undecodable records and records with an unregistered task type are logged
//! and skipped without a commit.

use crate::queue::{QueueSender, SendError};
use crate::registry::{JobRegistry, RegistryError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use job_platform_core::{Job, JobError};
use job_platform_protocol::{
    CommitRequest, JobTask, Message, MessageCodec, ProtocolError, SubscribeRequest,
};
use prost::Message as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to connect to any broker: {0}")]
    Connect(String),

    #[error("broker rejected subscription: {0}")]
    Subscribe(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("connection closed by broker")]
    ConnectionClosed,

    #[error("consumer task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // Per-record failures; the record is skipped and ingestion continues.
    #[error("failed to decode job task: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Resolve(#[from] RegistryError),

    #[error(transparent)]
    InvalidJob(#[from] JobError),
}

/// One raw record fetched from the job queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub partition: i32,
    pub offset: i64,
    pub value: Vec<u8>,
}

/// A consumer-group subscription on the job queue
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next record. Must be cancel-safe: the consumer races it
    /// against its stop token.
    async fn fetch(&mut self) -> Result<SourceMessage, ConsumerError>;

    /// Mark a record as processed
    async fn commit(&mut self, message: &SourceMessage) -> Result<(), ConsumerError>;

    /// Leave the consumer group
    async fn close(&mut self) -> Result<(), ConsumerError>;
}

/// [`MessageSource`] speaking the length-prefixed broker protocol over TCP
pub struct BrokerSource {
    framed: Framed<TcpStream, MessageCodec>,
    broker: String,
}

impl BrokerSource {
    /// Subscribe through the first broker that completes the handshake.
    ///
    /// Each broker gets `connect_timeout` for the TCP connect, the subscribe
    /// request and its acknowledgement together. Any failure moves on to the
    /// next broker; the last failure is returned when none succeeds.
    pub async fn connect(
        brokers: &[String],
        subscription: SubscribeRequest,
        connect_timeout: Duration,
    ) -> Result<Self, ConsumerError> {
        let mut last_error = None;

        for broker in brokers {
            let attempt = tokio::time::timeout(
                connect_timeout,
                Self::subscribe(broker, &subscription),
            )
            .await;

            let error = match attempt {
                Ok(Ok(framed)) => {
                    info!(
                        "Subscribed to topic {} as {} (group {}) via {}",
                        subscription.topic, subscription.client_id, subscription.group_id, broker
                    );
                    return Ok(BrokerSource {
                        framed,
                        broker: broker.clone(),
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => ConsumerError::Connect(format!(
                    "{}: no subscription within {:?}",
                    broker, connect_timeout
                )),
            };

            warn!(broker = %broker, error = %error, "Broker handshake failed, trying next");
            last_error = Some(error);
        }

        Err(last_error
            .unwrap_or_else(|| ConsumerError::Connect("no brokers configured".to_string())))
    }

    async fn subscribe(
        broker: &str,
        subscription: &SubscribeRequest,
    ) -> Result<Framed<TcpStream, MessageCodec>, ConsumerError> {
        let stream = TcpStream::connect(broker)
            .await
            .map_err(|e| ConsumerError::Connect(format!("{}: {}", broker, e)))?;

        let mut framed = Framed::new(stream, MessageCodec);
        framed.send(Message::Subscribe(subscription.clone())).await?;

        match framed.next().await {
            Some(Ok(Message::Ack(_))) => Ok(framed),
            Some(Ok(Message::Nack(nack))) => Err(ConsumerError::Subscribe(nack.error)),
            Some(Ok(other)) => Err(ProtocolError::Protocol(format!(
                "expected Ack to subscribe, got {:?}",
                other.message_type()
            ))
            .into()),
            Some(Err(e)) => Err(e.into()),
            None => Err(ConsumerError::ConnectionClosed),
        }
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }
}

#[async_trait]
impl MessageSource for BrokerSource {
    async fn fetch(&mut self) -> Result<SourceMessage, ConsumerError> {
        loop {
            match self.framed.next().await {
                Some(Ok(Message::Delivery(delivery))) => {
                    return Ok(SourceMessage {
                        partition: delivery.partition,
                        offset: delivery.offset,
                        value: delivery.value,
                    })
                }
                // Commit acknowledgements
                Some(Ok(Message::Ack(_))) => continue,
                Some(Ok(Message::Nack(nack))) => return Err(ConsumerError::Fetch(nack.error)),
                Some(Ok(other)) => {
                    return Err(ProtocolError::Protocol(format!(
                        "unexpected {:?} from broker",
                        other.message_type()
                    ))
                    .into())
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ConsumerError::ConnectionClosed),
            }
        }
    }

    async fn commit(&mut self, message: &SourceMessage) -> Result<(), ConsumerError> {
        self.framed
            .send(Message::Commit(CommitRequest {
                partition: message.partition,
                offset: message.offset,
            }))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConsumerError> {
        SinkExt::<Message>::close(&mut self.framed).await?;
        info!("Disconnected from broker {}", self.broker);
        Ok(())
    }
}

/// Decode a raw record into a job, resolving its wire task type
pub fn decode_job(registry: &JobRegistry, value: &[u8]) -> Result<Job, ConsumerError> {
    let task = JobTask::decode(value)?;
    let job_type = registry.resolve_wire_code(task.r#type)?;
    Ok(Job::from_wire(task.job_id, job_type, task.payload, task.created_at)?)
}

pub struct JobConsumer<S> {
    source: S,
    registry: Arc<JobRegistry>,
    jobs: QueueSender<Job>,
}

impl<S: MessageSource> JobConsumer<S> {
    pub fn new(source: S, registry: Arc<JobRegistry>, jobs: QueueSender<Job>) -> Self {
        JobConsumer {
            source,
            registry,
            jobs,
        }
    }

    /// Consume until `cancel` fires or the job queue closes.
    ///
    /// Fetch failures end the loop with an error; the caller treats that as
    /// fatal. The source is closed on every exit path.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        info!("Job consumer started");

        let outcome = self.consume(&cancel).await;
        if let Err(e) = &outcome {
            error!(error = %e, "Job consumer failed");
        }

        if let Err(e) = self.source.close().await {
            error!(error = %e, "Error closing message source");
        }

        info!("Job consumer stopped");
        outcome
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<(), ConsumerError> {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                fetched = self.source.fetch() => fetched?,
            };

            let job = match decode_job(&self.registry, &message.value) {
                Ok(job) => job,
                Err(e) => {
                    warn!(
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "Skipping undecodable job message"
                    );
                    continue;
                }
            };

            let job_id = job.id;
            debug!(job_id, job_type = %job.job_type, offset = message.offset, "Received job");

            // `Ok` means a worker or the buffer holds the job, even if the
            // stop token fired meanwhile, so the record must be committed.
            match self.jobs.send_until(job, cancel).await {
                Ok(()) => {}
                Err(SendError::Cancelled(_)) => {
                    info!(job_id, "Consumer stopped while waiting for queue space, job left uncommitted");
                    return Ok(());
                }
                Err(SendError::Closed(_)) => {
                    warn!(job_id, "Job queue closed, job left uncommitted");
                    return Ok(());
                }
            }

            if let Err(e) = self.source.commit(&message).await {
                error!(job_id, offset = message.offset, error = %e, "Failed to commit job message");
            }
        }
    }
}
