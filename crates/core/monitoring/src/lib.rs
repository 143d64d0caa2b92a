//! Logging, tracing, and metrics wiring for the replication publisher.
//!
//! Logging goes through `tracing-subscriber`; traces are optionally exported
//! to an OpenTelemetry collector; metrics are recorded into a
//! [`prometheus::Registry`] owned by the caller and rendered on demand.

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use opentelemetry_otlp::ExporterBuildError;

use self::telemetry::traces::SdkTracerProvider;

/// Options for exporting traces to an OpenTelemetry collector.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// OTLP collector endpoint (gRPC).
    pub url: String,
    /// Ratio of traces to sample, from 0.0 (none) to 1.0 (all).
    pub trace_ratio: f64,
}

/// Initializes logging and, when `tracing` is given, OpenTelemetry trace
/// export. The returned provider is an RAII guard; call
/// [`telemetry::traces::provider_flush_shutdown`] on it before exit.
pub fn init(
    default_log_level: Option<&str>,
    tracing: Option<TracingOptions>,
) -> Result<Option<SdkTracerProvider>, ExporterBuildError> {
    match tracing {
        Some(options) => {
            let provider =
                logging::init_with_telemetry(default_log_level, options.url, options.trace_ratio)?;
            Ok(Some(provider))
        }
        None => {
            logging::init(default_log_level);
            Ok(None)
        }
    }
}
