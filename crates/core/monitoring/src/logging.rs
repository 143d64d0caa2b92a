//! A set of utilities to enable logging configuration using tracing_subscriber.

use std::{io::IsTerminal, sync::Once};

use opentelemetry::trace::TracerProvider as _;
use tracing_subscriber::{
    self, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::telemetry;

/// List of crates in the workspace.
const WORKSPACE_CRATES: &[&str] = &[
    "osmdbt_arstotzka",
    "osmdbt_config",
    "osmdbt_monitoring",
    "osmdbt_object_store",
    "osmdbt_replication",
    "osmdbtd",
];

/// Initializes a tracing subscriber for logging.
///
/// `default_level` applies to the workspace crates; `RUST_LOG` directives
/// take precedence over it.
pub fn init(default_level: Option<&str>) {
    // Since we also use this function to enable logging in tests, wrap it in `Once` to prevent
    // multiple initializations.
    static INIT: Once = Once::new();
    let default_level = default_level.unwrap_or("info").to_string();
    INIT.call_once(move || {
        let env_filter = env_filter(&default_level);

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();
    });
}

/// Initializes a tracing subscriber for logging with OpenTelemetry tracing support.
pub fn init_with_telemetry(
    default_level: Option<&str>,
    url: String,
    trace_ratio: f64,
) -> telemetry::traces::Result {
    let env_filter = env_filter(default_level.unwrap_or("info"));

    let (telemetry_layer, traces_provider) = {
        let tracer_provider = telemetry::traces::provider(url, trace_ratio)?;
        let tracer = tracer_provider.tracer("osmdbt-tracer");
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        (telemetry_layer, tracer_provider)
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();

    Ok(traces_provider)
}

fn env_filter(default_level: &str) -> EnvFilter {
    // Parse directives from RUST_LOG
    let log_filter = EnvFilter::builder().with_default_directive(LevelFilter::ERROR.into());
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let mut env_filter = log_filter.parse(&directive_string).unwrap();

    for crate_name in WORKSPACE_CRATES {
        // Add directives for each workspace crate, if not overridden by RUST_LOG
        if !directive_string.contains(&format!("{crate_name}=")) {
            env_filter = env_filter
                .add_directive(format!("{crate_name}={default_level}").parse().unwrap());
        }
    }

    env_filter
}

/// Collect the error source chain as a vector of strings for tracing.
///
/// Walks the `.source()` chain of the provided error and collects each
/// source's Display representation into a vector. Returns an empty vector if
/// the error has no source chain.
pub fn error_source(err: &dyn std::error::Error) -> tracing::field::DebugValue<Vec<String>> {
    let mut sources = Vec::new();
    let mut current = err.source();

    while let Some(curr) = current {
        sources.push(curr.to_string());
        current = curr.source();
    }

    tracing::field::debug(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_source_with_three_level_chain_returns_two_sources() {
        //* Given
        #[derive(Debug, thiserror::Error)]
        #[error("connection refused")]
        struct ConnectionError;

        #[derive(Debug, thiserror::Error)]
        #[error("request failed")]
        struct RequestError(#[source] ConnectionError);

        #[derive(Debug, thiserror::Error)]
        #[error("lease not granted")]
        struct LeaseError(#[source] RequestError);

        let error = LeaseError(RequestError(ConnectionError));

        //* When
        let result = error_source(&error);

        //* Then
        let error_source_str = format!("{:?}", result);
        assert_eq!(
            error_source_str,
            r#"["request failed", "connection refused"]"#,
        );
    }

    #[test]
    fn error_source_with_no_source_returns_empty_vec() {
        //* Given
        #[derive(Debug, thiserror::Error)]
        #[error("something went wrong")]
        struct SimpleError;

        //* When
        let result = error_source(&SimpleError);

        //* Then
        assert_eq!(format!("{:?}", result), "[]");
    }
}
