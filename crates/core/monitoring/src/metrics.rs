//! Prometheus metric helpers.
//!
//! The registry is created once at startup and passed by reference to every
//! component that records metrics; it is rendered by the HTTP endpoint on
//! demand.

use prometheus::{
    Encoder as _, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

pub use prometheus::{Error, Registry as MetricsRegistry};

/// Create and register a counter.
pub fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Create and register a labeled counter.
pub fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, Error> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Create and register a labeled histogram with explicit bucket boundaries.
pub fn histogram_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: &[f64],
) -> Result<HistogramVec, Error> {
    let opts = HistogramOpts::new(name, help).buckets(buckets.to_vec());
    let histogram = HistogramVec::new(opts, labels)?;
    registry.register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

/// Render the registry in the Prometheus text exposition format.
pub fn render(registry: &Registry) -> Result<String, Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer).expect("text encoding is utf8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_are_rendered() {
        //* Given
        let registry = Registry::new();
        let jobs = counter(&registry, "jobs_total", "Total jobs").expect("register counter");
        let durations = histogram_vec(
            &registry,
            "job_duration_seconds",
            "Job durations",
            &["exit_code"],
            &[1.0, 10.0],
        )
        .expect("register histogram");

        //* When
        jobs.inc();
        durations.with_label_values(&["0"]).observe(2.5);
        let rendered = render(&registry).expect("render");

        //* Then
        assert!(rendered.contains("jobs_total 1"));
        assert!(rendered.contains(r#"job_duration_seconds_bucket{exit_code="0",le="10"} 1"#));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        //* Given
        let registry = Registry::new();
        counter(&registry, "jobs_total", "Total jobs").expect("first registration");

        //* When
        let second = counter(&registry, "jobs_total", "Total jobs");

        //* Then
        assert!(second.is_err());
    }
}
