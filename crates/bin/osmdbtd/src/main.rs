use std::{path::PathBuf, pin::pin, time::Duration};

use clap::Parser as _;
use osmdbt_config::{Config, ConfigError};
use osmdbt_monitoring::{telemetry::traces, TracingOptions};
use osmdbt_replication::error::JobError;
use prometheus::Registry;
use tokio::sync::broadcast;

mod liveness;
mod scheduler;
mod wiring;

use self::scheduler::InvalidCronExpression;

/// Publishes OpenStreetMap replication diffs from a PostgreSQL logical
/// replication slot to an object store, one job per invocation or cron tick.
#[derive(Debug, clap::Parser)]
#[command(name = "osmdbtd", version)]
struct Args {
    /// The configuration file to use.
    #[arg(long, short = 'c', env = "OSMDBT_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let exit_code = match main_inner(args).await {
        Ok(code) => code,
        Err(err) => {
            // Manually print the error so we can control the format.
            eprintln!("Exiting with error: {}", error_with_causes(&err));
            1
        }
    };
    std::process::exit(exit_code);
}

async fn main_inner(args: Args) -> Result<i32, SetupError> {
    let config = Config::load(&args.config)?;

    let tracing_options = match &config.telemetry.tracing {
        tracing_config if tracing_config.enabled => {
            tracing_config.url.clone().map(|url| TracingOptions {
                url,
                trace_ratio: tracing_config.ratio,
            })
        }
        _ => None,
    };
    let traces_provider =
        osmdbt_monitoring::init(config.telemetry.logger.as_deref(), tracing_options)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting osmdbtd");

    let registry = Registry::new();
    let engine = wiring::build_engine(&config, &registry)?;
    let mode = scheduler::Mode::from_config(&config.app.cron)?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let liveness_handle = tokio::spawn(liveness::serve(
        config.app.liveness_addr,
        registry.clone(),
        shutdown_tx.subscribe(),
    ));

    let mut scheduler_fut = pin!(scheduler::run(&engine, mode, shutdown_tx.subscribe()));
    let exit_code = tokio::select! {
        result = &mut scheduler_fut => match result {
            Ok(()) => 0,
            Err(err) => err.exit_code(),
        },
        _ = shutdown_signal() => {
            // Stop accepting ticks and give the in-flight job until the hard
            // safety timer to reach a natural phase boundary.
            shutdown_tx.send(()).ok();
            let hard_timer = Duration::from_secs(config.app.shutdown_timeout_secs);
            match tokio::time::timeout(hard_timer, &mut scheduler_fut).await {
                Ok(_) => tracing::info!("in-flight work finished, terminating"),
                Err(_) => tracing::warn!(
                    timeout_secs = hard_timer.as_secs(),
                    "graceful shutdown timed out, terminating anyway",
                ),
            }
            JobError::Terminated.exit_code()
        }
    };

    // Shut the liveness server down and flush pending telemetry.
    shutdown_tx.send(()).ok();
    if let Ok(Err(err)) = liveness_handle.await {
        tracing::warn!(error = %err, "liveness endpoint failed");
    }
    if let Some(provider) = traces_provider {
        if let Err(err) = traces::provider_flush_shutdown(provider) {
            tracing::warn!(error = %err, "failed to flush traces");
        }
    }

    Ok(exit_code)
}

/// Returns a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => tracing::info!(signal = "SIGINT", "shutdown signal"),
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "shutdown signal"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        tracing::info!("shutdown signal");
    }
}

/// Top-level error type for the `osmdbtd` binary.
///
/// Setup failures happen before any job runs and always map to exit code 1;
/// job failures carry their own exit codes through the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Failed to load config: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to initialize telemetry: {0}")]
    Monitoring(#[from] osmdbt_monitoring::ExporterBuildError),

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Failed to create object store client: {0}")]
    ObjectStore(#[from] osmdbt_object_store::ObjectStoreCreationError),

    #[error("Failed to create mediator client: {0}")]
    Arstotzka(#[from] osmdbt_arstotzka::ArstotzkaError),

    #[error("Failed to configure the scheduler: {0}")]
    Scheduler(#[from] InvalidCronExpression),
}

/// Builds an error chain string from an error and its sources.
fn error_with_causes(err: &dyn std::error::Error) -> String {
    let mut error_chain = Vec::new();
    let mut current = err;
    while let Some(source) = current.source() {
        error_chain.push(source.to_string());
        current = source;
    }

    if error_chain.is_empty() {
        err.to_string()
    } else {
        format!("{} | Caused by: {}", err, error_chain.join(" -> "))
    }
}
