use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use audiobook_jobs::config::validate_config;
use audiobook_jobs::db::default_data_dir;
use audiobook_jobs::{load_config, BoxError, ConfigError, JobStore, QueueConfig, Worker};

/// Claims queued conversion jobs and runs them until interrupted.
#[derive(Parser, Debug)]
#[command(name = "audiobook-worker", version, about)]
struct Args {
    /// JSON config file (default: ~/.audiobook-jobs/config.json)
    #[arg(short, long, env = "AUDIOBOOK_JOBS_CONFIG")]
    config: Option<PathBuf>,

    /// Job database, overrides the config file
    #[arg(long, env = "AUDIOBOOK_JOBS_DATABASE")]
    database: Option<PathBuf>,

    /// Worker id reported in heartbeats
    #[arg(long)]
    worker_id: Option<String>,

    /// Seconds to wait between polls of an empty queue
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<f64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("audiobook-worker: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.log_level, args.json_logs) {
        eprintln!("audiobook-worker: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "worker failed");
            ExitCode::FAILURE
        }
    }
}

/// Config file first, then command-line overrides.
fn load(args: &Args) -> Result<QueueConfig, ConfigError> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => default_data_dir()
            .map(|d| d.join("config.json"))
            .ok_or(ConfigError::NoHomeDirectory("config"))?,
    };

    let mut config = load_config(&path)?;
    if let Some(database) = &args.database {
        config.database_path = Some(database.clone());
    }
    if let Some(worker_id) = &args.worker_id {
        config.worker.worker_id = Some(worker_id.clone());
    }
    if let Some(poll_interval) = args.poll_interval {
        config.worker.poll_interval_secs = poll_interval;
    }
    validate_config(&config)?;
    Ok(config)
}

/// `RUST_LOG` wins over the configured level. `log` records from the
/// storage layer are forwarded into tracing.
fn init_tracing(level: &str, json: bool) -> Result<(), BoxError> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        Box::new(fmt::layer().json().with_filter(filter))
    } else {
        Box::new(fmt::layer().with_target(true).with_filter(filter))
    };

    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layer))?;
    Ok(())
}

fn run(config: &QueueConfig) -> Result<(), BoxError> {
    let database = config.resolved_database_path()?;
    let store = JobStore::open(&database)?;
    let mut worker = Worker::from_config(store, config)?;

    let shutdown = worker.shutdown_token();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested, finishing the current chunk");
        shutdown.cancel();
    })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %database.display(),
        worker_id = worker.worker_id(),
        "audiobook worker starting"
    );
    worker.run();
    Ok(())
}
