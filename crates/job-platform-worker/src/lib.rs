pub mod config;
pub mod consumer;
pub mod executor;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod reporter;
pub mod signal;
pub mod status;

pub use config::WorkerConfig;
pub use consumer::{BrokerSource, ConsumerError, JobConsumer, MessageSource, SourceMessage};
pub use executor::{default_registrations, Executor, ExecutorError, ExecutorSet};
pub use pipeline::{Pipeline, PipelineError, PipelineSettings, ShutdownReport};
pub use pool::{PoolSnapshot, WorkerPool};
pub use queue::{bounded, QueueClosed, QueueReceiver, QueueSender, SendError};
pub use registry::{JobRegistry, Registration, RegistryBuilder, RegistryError};
pub use reporter::{ReporterStats, ResultReporter};
pub use status::{GrpcStatusClient, ReportError, StatusReporter, StatusUpdate};
