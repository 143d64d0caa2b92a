use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
pub use opentelemetry_sdk::trace::SdkTracerProvider;

pub type Result = std::result::Result<SdkTracerProvider, ExporterBuildError>;

/// Builds a tracer provider exporting to `url` over gRPC, sampling the given
/// ratio of traces. The ratio is clamped to `[0.0, 1.0]`.
pub fn provider(url: String, trace_ratio: f64) -> Result {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(url)
        .build()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_attribute(opentelemetry::KeyValue::new("service.name", "osmdbt"))
        .build();
    let sampler =
        opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(trace_ratio.clamp(0.0, 1.0));

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .with_sampler(sampler)
        .build())
}

/// Flushes pending spans and shuts the provider down. Call before process
/// exit; during normal operation spans are exported in batches.
pub fn provider_flush_shutdown(
    provider: SdkTracerProvider,
) -> std::result::Result<(), opentelemetry_sdk::error::OTelSdkError> {
    provider.force_flush()?;
    provider.shutdown()
}
