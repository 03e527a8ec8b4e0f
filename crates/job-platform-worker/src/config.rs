//! Worker configuration

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Prefix of environment variables that override configuration values,
/// e.g. `JOB_WORKER__POOL__SIZE=8`.
pub const ENV_PREFIX: &str = "JOB_WORKER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to render configuration: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Job queue (broker) settings
    pub queue: QueueSettings,
    /// Status service settings
    pub status: StatusSettings,
    /// Worker pool settings
    pub pool: PoolSettings,
    /// Shutdown settings
    pub shutdown: ShutdownSettings,
    /// Executor settings
    pub executors: ExecutorSettings,
    /// Logging settings
    pub logging: LoggingSettings,
    /// Deployment environment name, informational only
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Broker addresses, tried in order
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    /// Generated from hostname and pid when not set
    pub client_id: Option<String>,
    /// Per-broker budget for connecting and subscribing, in milliseconds
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    /// Status service gRPC address
    pub address: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of parallel workers
    pub size: usize,
    /// Per-job execution timeout in milliseconds
    pub job_timeout_ms: u64,
    /// Job queue capacity (0 = synchronous hand-off)
    pub job_queue_capacity: usize,
    /// Result queue capacity (0 = synchronous hand-off)
    pub result_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Budget for the whole drain sequence in milliseconds
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// HTTP client timeout for HTTP_GET jobs in seconds
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of debug, info, warn, error
    pub level: String,
    pub format: LogFormat,
    /// Include source file and line in log lines
    pub debug: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            status: StatusSettings::default(),
            pool: PoolSettings::default(),
            shutdown: ShutdownSettings::default(),
            executors: ExecutorSettings::default(),
            logging: LoggingSettings::default(),
            environment: "development".to_string(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "job_requests".to_string(),
            group_id: "job-workers-group-v1".to_string(),
            client_id: None,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            address: "localhost:9090".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 10,
            job_timeout_ms: 30_000,
            job_queue_capacity: 100,
            result_queue_capacity: 100,
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            http_timeout_secs: 10,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            debug: false,
        }
    }
}

impl QueueSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl StatusSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PoolSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

impl ShutdownSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ExecutorSettings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl WorkerConfig {
    /// Load configuration from an optional file and the environment, then
    /// validate it
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Self::environment_source())
    }

    fn environment_source() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("queue.brokers")
            .try_parsing(true)
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: WorkerConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting; the process must not start on failure
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(message: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(message.to_string()))
        }

        if self.queue.brokers.is_empty() {
            return invalid("queue.brokers must contain at least one broker");
        }
        if self.queue.brokers.iter().any(|b| b.trim().is_empty()) {
            return invalid("queue.brokers contains an empty broker");
        }
        if self.queue.topic.is_empty() {
            return invalid("queue.topic cannot be empty");
        }
        if self.queue.group_id.is_empty() {
            return invalid("queue.group_id cannot be empty");
        }
        if self.queue.connect_timeout_ms == 0 {
            return invalid("queue.connect_timeout_ms must be positive");
        }

        if self.status.address.is_empty() {
            return invalid("status.address cannot be empty");
        }
        if self.status.timeout_ms == 0 {
            return invalid("status.timeout_ms must be positive");
        }

        if self.pool.size == 0 {
            return invalid("pool.size must be positive");
        }
        if self.pool.job_timeout_ms == 0 {
            return invalid("pool.job_timeout_ms must be positive");
        }

        if self.shutdown.timeout_ms == 0 {
            return invalid("shutdown.timeout_ms must be positive");
        }
        if self.executors.http_timeout_secs == 0 {
            return invalid("executors.http_timeout_secs must be positive");
        }

        match self.logging.level.to_lowercase().as_str() {
            "debug" | "info" | "warn" | "error" => Ok(()),
            _ => invalid("logging.level must be one of: debug, info, warn, error"),
        }
    }

    /// Client id used when subscribing to the broker
    pub fn client_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.queue.client_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }

    /// Render the effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl fmt::Display for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Job Worker Configuration ===")?;
        writeln!(f, "Queue:")?;
        writeln!(f, "  Brokers: [{}]", self.queue.brokers.join(", "))?;
        writeln!(f, "  Topic: {}", self.queue.topic)?;
        writeln!(f, "  Group ID: {}", self.queue.group_id)?;
        writeln!(
            f,
            "  Client ID: {}",
            self.queue.client_id.as_deref().unwrap_or("<generated>")
        )?;
        writeln!(f, "  Connect timeout: {:?}", self.queue.connect_timeout())?;
        writeln!(f, "Status service:")?;
        writeln!(f, "  Address: {}", self.status.address)?;
        writeln!(f, "  Timeout: {:?}", self.status.timeout())?;
        writeln!(f, "Worker pool:")?;
        writeln!(f, "  Size: {}", self.pool.size)?;
        writeln!(f, "  Job timeout: {:?}", self.pool.job_timeout())?;
        writeln!(f, "  Job queue capacity: {}", self.pool.job_queue_capacity)?;
        writeln!(f, "  Result queue capacity: {}", self.pool.result_queue_capacity)?;
        writeln!(f, "Shutdown timeout: {:?}", self.shutdown.timeout())?;
        writeln!(
            f,
            "Logging: {} ({:?}, debug: {})",
            self.logging.level, self.logging.format, self.logging.debug
        )?;
        write!(f, "Environment: {}", self.environment)
    }
}
