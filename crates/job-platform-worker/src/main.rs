use clap::Parser;
use job_platform_protocol::SubscribeRequest;
use job_platform_worker::config::{LogFormat, LoggingSettings};
use job_platform_worker::signal::shutdown_signal;
use job_platform_worker::{
    default_registrations, BrokerSource, GrpcStatusClient, JobRegistry, Pipeline, WorkerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "job-worker")]
#[command(about = "Job Platform Worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "JOB_WORKER_CONFIG")]
    config: Option<PathBuf>,

    /// Broker addresses, comma separated
    #[arg(long, value_delimiter = ',')]
    brokers: Option<Vec<String>>,

    /// Number of parallel workers
    #[arg(short = 'n', long)]
    concurrency: Option<usize>,

    /// Status service address
    #[arg(long)]
    status_address: Option<String>,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(logging: &LoggingSettings) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_lowercase()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(logging.debug)
        .with_line_number(logging.debug);

    let registry = tracing_subscriber::registry().with(env_filter);
    match logging.format {
        LogFormat::Json => registry.with(fmt_layer.json()).init(),
        LogFormat::Text => registry.with(fmt_layer).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = WorkerConfig::load(args.config.as_deref())?;

    // Override with CLI args
    if let Some(brokers) = args.brokers {
        config.queue.brokers = brokers;
    }
    if let Some(concurrency) = args.concurrency {
        config.pool.size = concurrency;
    }
    if let Some(address) = args.status_address {
        config.status.address = address;
    }
    config.validate()?;

    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    init_tracing(&config.logging);
    tracing::info!("Starting job worker\n{}", config);

    // Job types
    let registry = Arc::new(JobRegistry::from_registrations(default_registrations())?);
    registry.validate_complete()?;
    tracing::info!("Registered job types: {:?}", registry.job_types());

    // Collaborators
    let status_client = GrpcStatusClient::connect_lazy(&config.status.address, config.status.timeout())?;
    let client_id = config.client_id();
    let source = BrokerSource::connect(
        &config.queue.brokers,
        SubscribeRequest {
            topic: config.queue.topic.clone(),
            group_id: config.queue.group_id.clone(),
            client_id: client_id.clone(),
        },
        config.queue.connect_timeout(),
    )
    .await?;

    let mut pipeline = Pipeline::start(&config, registry, status_client)?;
    pipeline.attach_source(source)?;
    tracing::info!(client_id = %client_id, "Job worker running");

    let fatal = tokio::select! {
        signal = shutdown_signal() => {
            tracing::info!("Received {}, shutting down", signal);
            None
        }
        stopped = pipeline.ingestion_stopped() => match stopped {
            Ok(()) => {
                tracing::warn!("Job ingestion stopped unexpectedly, shutting down");
                None
            }
            Err(e) => {
                tracing::error!("Job ingestion failed: {}", e);
                Some(e)
            }
        },
    };

    let report = pipeline.shutdown().await;
    tracing::info!(
        elapsed_ms = report.elapsed.as_millis() as u64,
        budget_exceeded = report.budget_exceeded,
        completed = report.pool.completed,
        failed = report.pool.failed,
        "Job worker stopped"
    );

    if let Some(e) = fatal {
        return Err(anyhow::anyhow!(e).context("job ingestion failed"));
    }

    Ok(())
}
