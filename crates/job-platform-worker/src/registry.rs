//! Job type registry.
//!
//! Binds each [`JobType`] to its wire-level [`TaskType`] code and to the
//! factory that builds its executor. Registrations are collected on a
//! [`RegistryBuilder`] during startup; [`RegistryBuilder::build`] consumes the
//! builder, so the resulting [`JobRegistry`] can no longer be modified and is
//! shared read-only (behind an `Arc`) by the consumer and the pipeline.

use crate::config::WorkerConfig;
use crate::executor::{Executor, ExecutorError, ExecutorSet};
use job_platform_core::JobType;
use job_platform_protocol::TaskType;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Builds the executor for one job type
pub type ExecutorFactory =
    Box<dyn Fn(&WorkerConfig) -> Result<Arc<dyn Executor>, ExecutorError> + Send + Sync>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("wire code {0} is not a registrable task type")]
    InvalidWireCode(i32),

    #[error("job type {0} is already registered")]
    DuplicateJobType(JobType),

    #[error("wire code {} is already registered", .0.as_str_name())]
    DuplicateWireCode(TaskType),

    #[error("unregistered wire code: {0}")]
    UnregisteredWireCode(i32),

    #[error("no executor factory registered for job type {0}")]
    MissingFactory(JobType),

    #[error("failed to build executor for {job_type}: {source}")]
    Factory {
        job_type: JobType,
        #[source]
        source: ExecutorError,
    },
}

/// One (job type, wire code, factory) triple
pub struct Registration {
    job_type: JobType,
    wire_code: TaskType,
    factory: ExecutorFactory,
}

impl Registration {
    pub fn new<F>(job_type: JobType, wire_code: TaskType, factory: F) -> Self
    where
        F: Fn(&WorkerConfig) -> Result<Arc<dyn Executor>, ExecutorError> + Send + Sync + 'static,
    {
        Registration {
            job_type,
            wire_code,
            factory: Box::new(factory),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn wire_code(&self) -> TaskType {
        self.wire_code
    }
}

/// Collects registrations before the pipeline starts
#[derive(Default)]
pub struct RegistryBuilder {
    by_wire_code: HashMap<i32, JobType>,
    wire_codes: HashMap<JobType, TaskType>,
    factories: HashMap<JobType, ExecutorFactory>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job type. Fails on the `UNKNOWN_TYPE` sentinel code and on
    /// any job type or wire code that is already taken.
    pub fn register(&mut self, registration: Registration) -> Result<&mut Self, RegistryError> {
        let Registration {
            job_type,
            wire_code,
            factory,
        } = registration;

        if wire_code == TaskType::UnknownType {
            return Err(RegistryError::InvalidWireCode(wire_code as i32));
        }
        if self.wire_codes.contains_key(&job_type) {
            return Err(RegistryError::DuplicateJobType(job_type));
        }
        if self.by_wire_code.contains_key(&(wire_code as i32)) {
            return Err(RegistryError::DuplicateWireCode(wire_code));
        }

        self.by_wire_code.insert(wire_code as i32, job_type);
        self.wire_codes.insert(job_type, wire_code);
        self.factories.insert(job_type, factory);
        Ok(self)
    }

    pub fn build(self) -> JobRegistry {
        JobRegistry {
            by_wire_code: self.by_wire_code,
            wire_codes: self.wire_codes,
            factories: self.factories,
        }
    }
}

/// Immutable job type registry
pub struct JobRegistry {
    by_wire_code: HashMap<i32, JobType>,
    wire_codes: HashMap<JobType, TaskType>,
    factories: HashMap<JobType, ExecutorFactory>,
}

impl JobRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Build a registry from an ordered registration list
    pub fn from_registrations(
        registrations: impl IntoIterator<Item = Registration>,
    ) -> Result<Self, RegistryError> {
        let mut builder = RegistryBuilder::new();
        for registration in registrations {
            builder.register(registration)?;
        }
        Ok(builder.build())
    }

    /// Map a wire code from an inbound message to its job type
    pub fn resolve_wire_code(&self, wire_code: i32) -> Result<JobType, RegistryError> {
        self.by_wire_code
            .get(&wire_code)
            .copied()
            .ok_or(RegistryError::UnregisteredWireCode(wire_code))
    }

    pub fn wire_code(&self, job_type: JobType) -> Option<TaskType> {
        self.wire_codes.get(&job_type).copied()
    }

    /// Invoke every registered factory once. Job types without a factory are
    /// skipped with a warning; [`validate_complete`](Self::validate_complete)
    /// is the gate that rejects them.
    pub fn build_executors(&self, config: &WorkerConfig) -> Result<ExecutorSet, RegistryError> {
        let mut executors = ExecutorSet::new();

        for job_type in JobType::ALL {
            let Some(factory) = self.factories.get(&job_type) else {
                warn!(job_type = %job_type, "No executor factory registered, skipping");
                continue;
            };

            let executor = factory(config)
                .map_err(|source| RegistryError::Factory { job_type, source })?;
            executors.insert(job_type, executor);
        }

        info!("Built {} executors", executors.len());
        Ok(executors)
    }

    /// Fail if any supported job type has no registered factory
    pub fn validate_complete(&self) -> Result<(), RegistryError> {
        for job_type in JobType::ALL {
            if !self.factories.contains_key(&job_type) {
                return Err(RegistryError::MissingFactory(job_type));
            }
        }
        Ok(())
    }

    pub fn job_types(&self) -> Vec<JobType> {
        let mut job_types: Vec<JobType> = self.factories.keys().copied().collect();
        job_types.sort();
        job_types
    }
}
