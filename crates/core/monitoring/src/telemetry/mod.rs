//! Utilities for running OpenTelemetry exporters and collecting [traces].

pub use opentelemetry_otlp::ExporterBuildError;

pub mod traces;
